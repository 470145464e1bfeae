//! pacebench command-line entry point. Also serves as the worker binary of
//! the multiprocess strategy (`--pacebench-worker`).

fn main() -> anyhow::Result<()> {
    pacebench::run()
}

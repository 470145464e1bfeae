//! Built-in Workloads
//!
//! CPU-bound kernels timed by the micro suite, plus the two tasks the
//! concurrency comparator fans out. Randomized inputs are seeded from the
//! parameter so every call with the same param does the same work.

use crate::catalog::{ResultShape, Suite, WorkloadCase, WorkloadError};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

/// nth Fibonacci number, iterative
pub fn fibonacci(n: u64) -> Result<i64, WorkloadError> {
    if n > 92 {
        return Err(WorkloadError::InvalidParam {
            param: n,
            reason: "fibonacci overflows i64 beyond n = 92",
        });
    }
    if n < 2 {
        return Ok(n as i64);
    }

    let (mut a, mut b) = (0i64, 1i64);
    for _ in 2..=n {
        (a, b) = (b, a + b);
    }
    Ok(b)
}

/// nth Fibonacci number, naive recursion (exponential on purpose)
pub fn fibonacci_recursive(n: u64) -> Result<i64, WorkloadError> {
    if n > 50 {
        return Err(WorkloadError::InvalidParam {
            param: n,
            reason: "recursive fibonacci is capped at n = 50",
        });
    }

    fn fib(n: u64) -> i64 {
        if n <= 1 {
            n as i64
        } else {
            fib(n - 1) + fib(n - 2)
        }
    }

    Ok(fib(n))
}

/// All primes below `limit` (Sieve of Eratosthenes)
pub fn sieve(limit: usize) -> Vec<usize> {
    if limit < 2 {
        return Vec::new();
    }

    let mut is_prime = vec![true; limit];
    is_prime[0] = false;
    is_prime[1] = false;

    let mut n = 2;
    while n * n < limit {
        if is_prime[n] {
            for multiple in (n * n..limit).step_by(n) {
                is_prime[multiple] = false;
            }
        }
        n += 1;
    }

    is_prime
        .iter()
        .enumerate()
        .filter_map(|(idx, &prime)| prime.then_some(idx))
        .collect()
}

/// Number of primes below `limit`, materializing the prime list
pub fn prime_sieve(limit: u64) -> Result<i64, WorkloadError> {
    Ok(sieve(limit as usize).len() as i64)
}

/// Number of primes below `limit` by trial division.
///
/// Deliberately slower than the sieve: it is the CPU-bound concurrency task
/// and should burn time without allocating.
pub fn count_primes(limit: u64) -> Result<i64, WorkloadError> {
    let mut count = 0i64;
    for candidate in 2..limit {
        let mut divisor = 2;
        let mut prime = true;
        while divisor * divisor <= candidate {
            if candidate % divisor == 0 {
                prime = false;
                break;
            }
            divisor += 1;
        }
        if prime {
            count += 1;
        }
    }
    Ok(count)
}

/// Serialize and re-parse a seeded JSON payload of `size` elements
pub fn json_roundtrip(size: u64) -> Result<i64, WorkloadError> {
    if size == 0 {
        return Err(WorkloadError::InvalidParam {
            param: size,
            reason: "payload size must be positive",
        });
    }

    let mut rng = StdRng::seed_from_u64(size);
    let numbers: Vec<f64> = (0..size).map(|_| rng.r#gen::<f64>()).collect();
    let payload = serde_json::json!({
        "numbers": numbers,
        "nested": { "a": "value", "b": (0..size).collect::<Vec<u64>>() },
        "flag": true,
    });

    let serialized =
        serde_json::to_string(&payload).map_err(|e| WorkloadError::Failed(e.to_string()))?;
    let decoded: serde_json::Value =
        serde_json::from_str(&serialized).map_err(|e| WorkloadError::Failed(e.to_string()))?;

    decoded["nested"]["b"]
        .as_array()
        .map(|items| items.len() as i64)
        .ok_or_else(|| WorkloadError::Failed("decoded payload lost `nested.b`".to_string()))
}

/// Bubble-sort `size` seeded random integers and return the minimum
pub fn bubble_sort(size: u64) -> Result<i64, WorkloadError> {
    if size == 0 {
        return Err(WorkloadError::InvalidParam {
            param: size,
            reason: "size must be positive",
        });
    }

    let mut rng = StdRng::seed_from_u64(size);
    let mut values: Vec<u64> = (0..size).map(|_| rng.gen_range(0..=size)).collect();

    let len = values.len();
    for i in 0..len {
        for j in 0..len - i - 1 {
            if values[j] > values[j + 1] {
                values.swap(j, j + 1);
            }
        }
    }

    Ok(values[0] as i64)
}

/// Four threads each accumulating `iterations` trigonometric terms.
///
/// Exercises thread spawn/join inside a single timed call.
pub fn threaded_trigonometry(iterations: u64) -> Result<i64, WorkloadError> {
    const WORKERS: u64 = 4;

    if iterations == 0 {
        return Err(WorkloadError::InvalidParam {
            param: iterations,
            reason: "iterations must be positive",
        });
    }

    let total: f64 = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..WORKERS)
            .map(|worker| {
                scope.spawn(move || {
                    let offset = worker * iterations;
                    (0..iterations)
                        .map(|index| {
                            let angle = (offset + index) as f64 * 0.0003;
                            angle.sin() * (angle * 0.5).cos()
                        })
                        .sum::<f64>()
                })
            })
            .collect();

        handles
            .into_iter()
            .map(|handle| handle.join().unwrap_or(f64::NAN))
            .sum()
    });

    if total.is_nan() {
        return Err(WorkloadError::Failed("a trigonometry thread panicked".to_string()));
    }
    Ok((total * 1_000_000.0) as i64)
}

/// Block the calling thread for `millis` milliseconds, standing in for IO
pub fn io_wait(millis: u64) -> Result<i64, WorkloadError> {
    std::thread::sleep(Duration::from_millis(millis));
    Ok(millis as i64)
}

fn always_fails(param: u64) -> Result<i64, WorkloadError> {
    Err(WorkloadError::Failed(format!("diagnostic failure for param {param}")))
}

fn always_panics(param: u64) -> Result<i64, WorkloadError> {
    panic!("diagnostic panic for param {param}");
}

fn abort_process(_: u64) -> Result<i64, WorkloadError> {
    std::process::abort();
}

inventory::submit! {
    WorkloadCase::new(
        "fibonacci_40",
        "Iterative Fibonacci term",
        fibonacci,
        40,
        ResultShape::Value,
        Suite::Micro,
    )
    .expecting(102_334_155)
}

inventory::submit! {
    WorkloadCase::new(
        "fibonacci_rec_32",
        "Naively recursive Fibonacci term",
        fibonacci_recursive,
        32,
        ResultShape::Value,
        Suite::Micro,
    )
    .expecting(2_178_309)
}

inventory::submit! {
    WorkloadCase::new(
        "prime_sieve_5000",
        "Sieve of Eratosthenes, returns the number of primes found",
        prime_sieve,
        5_000,
        ResultShape::Count,
        Suite::Micro,
    )
    .expecting(669)
}

inventory::submit! {
    WorkloadCase::new(
        "json_roundtrip_500",
        "Serialize and parse a seeded JSON document",
        json_roundtrip,
        500,
        ResultShape::Count,
        Suite::Micro,
    )
    .expecting(500)
}

inventory::submit! {
    WorkloadCase::new(
        "bubble_sort_10000",
        "Bubble sort of seeded random integers, returns the minimum",
        bubble_sort,
        10_000,
        ResultShape::Value,
        Suite::Micro,
    )
}

inventory::submit! {
    WorkloadCase::new(
        "threaded_trig_4x20000",
        "Four threads accumulating trigonometric terms",
        threaded_trigonometry,
        20_000,
        ResultShape::Checksum,
        Suite::Micro,
    )
}

inventory::submit! {
    WorkloadCase::new(
        "count_primes",
        "Trial-division prime count; the CPU-bound concurrency task",
        count_primes,
        200_000,
        ResultShape::Count,
        Suite::Concurrency,
    )
    .expecting(17_984)
}

inventory::submit! {
    WorkloadCase::new(
        "io_wait",
        "Timed sleep in milliseconds; the IO-bound concurrency task",
        io_wait,
        20,
        ResultShape::Value,
        Suite::Concurrency,
    )
    .expecting(20)
}

inventory::submit! {
    WorkloadCase::new(
        "diagnostic_fail",
        "Always returns an error",
        always_fails,
        0,
        ResultShape::Value,
        Suite::Diagnostic,
    )
}

inventory::submit! {
    WorkloadCase::new(
        "diagnostic_panic",
        "Always panics",
        always_panics,
        0,
        ResultShape::Value,
        Suite::Diagnostic,
    )
}

inventory::submit! {
    WorkloadCase::new(
        "diagnostic_abort",
        "Aborts the hosting process; only meaningful inside a worker process",
        abort_process,
        0,
        ResultShape::Value,
        Suite::Diagnostic,
    )
}

//! Timed mutex demonstration
//!
//! Several threads contend for one mutex, each waiting a different time
//! before taking it. One of them gives up after a short acquire timeout.

use aesdsocket::threading::{start_thread_obtaining_mutex, ThreadData};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter("aesdsocket=debug")
        .with_thread_names(true)
        .init();

    let mutex = Arc::new(Mutex::new(()));

    let plans = [
        ThreadData::new(0, 200),
        ThreadData::new(50, 100),
        ThreadData::new(50, 0).with_acquire_timeout(Duration::from_millis(20)),
    ];

    let mut handles = Vec::new();
    for plan in plans {
        handles.push(start_thread_obtaining_mutex(Arc::clone(&mutex), plan)?);
    }

    for (i, handle) in handles.into_iter().enumerate() {
        let data = handle
            .join()
            .map_err(|_| format!("thread {} panicked", i))?;
        println!(
            "thread {}: obtain after {:?}, hold {:?} -> {}",
            i,
            data.wait_to_obtain,
            data.wait_to_release,
            if data.complete_success { "ok" } else { "failed" }
        );
    }

    Ok(())
}

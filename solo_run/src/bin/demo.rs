//! Interactive demo: alternating timers, then a stdin-driven read loop.

use log::{LevelFilter, error, info};
use solo_run::io::{AsyncReader, ReadOutcome, Stdin};
use solo_run::logger;
use solo_run::runtime::Handle;
use solo_run::timer::Timer;
use std::time::Duration;

async fn alternating_timers(handle: Handle) {
    let mut short = Timer::new(&handle, Duration::from_secs(2));
    let mut long = Timer::new(&handle, Duration::from_secs(5));
    for _ in 0..3 {
        info!("Waiting for timer 1...");
        short.wait().await; // reuse
        long.wait().await; // reuse
    }
}

async fn stdin_and_timers(handle: Handle) -> std::io::Result<()> {
    let mut input = AsyncReader::new(&handle, Stdin::new());
    loop {
        match input.read().await? {
            ReadOutcome::Data(value) => info!("Read value {}", value.trim_end()),
            ReadOutcome::Eof => {
                info!("End of input, shutting down");
                return Ok(());
            }
        }
        alternating_timers(handle.clone()).await;
    }
}

#[solo_run::main]
async fn main(handle: Handle) {
    if let Err(err) = logger::builder()
        .level(LevelFilter::Trace)
        .console(true, true)
        .init()
    {
        eprintln!("logger setup failed: {err}");
    }

    alternating_timers(handle.clone()).await;
    if let Err(err) = stdin_and_timers(handle).await {
        error!("stdin session failed: {err}");
    }
}

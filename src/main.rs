#![warn(rust_2018_idioms)]
#![warn(clippy::pedantic)]

use never::Context;
use std::io;

#[tokio::main]
async fn main() {
    let ctx = Context::background();
    let signal_ctx = ctx.clone();
    tokio::spawn(async move {
        if let Err(e) = never::app::cancel_on(&signal_ctx, shutdown_signal()).await {
            eprintln!("never: shutdown signals are not handled: {e}");
        }
    });

    let args: Vec<String> = std::env::args().skip(1).collect();
    let version = env!("CARGO_PKG_VERSION");
    if let Err(e) = never::app::run(&ctx, version, &args, io::stdout).await {
        eprintln!("{e}");
        std::process::exit(1);
    }
}

#[cfg(unix)]
async fn shutdown_signal() -> io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    let interrupt = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => Ok(()),
            Err(e) => {
                // SIGTERM still works.
                eprintln!("never: Ctrl-C is not handled: {e}");
                std::future::pending::<io::Result<()>>().await
            }
        }
    };
    tokio::select! {
        result = interrupt => result,
        received = terminate.recv() => received.ok_or_else(|| {
            io::Error::new(io::ErrorKind::BrokenPipe, "SIGTERM listener closed")
        }),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> io::Result<()> {
    tokio::signal::ctrl_c().await
}

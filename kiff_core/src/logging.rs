use tracing_subscriber::{util::SubscriberInitExt, EnvFilter};

/// Install the global stderr subscriber.
///
/// `RUST_LOG` wins when set; otherwise `info`, or `debug` when `verbose`.
/// Returns `false` if a subscriber was already installed.
pub fn init(verbose: bool) -> bool {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_env_filter(filter(verbose))
        .finish()
        .try_init()
        .is_ok()
}

fn filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)))
}

const fn default_directive(verbose: bool) -> &'static str {
    if verbose {
        "debug"
    } else {
        "info"
    }
}

//! 观测性初始化与结构化诊断记录。

pub mod events;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

pub const ENV_LOG_FORMAT: &str = "PARLEY_LOG_FORMAT";

/// Installs the global subscriber. Filtering follows `RUST_LOG` (default
/// `info`); `PARLEY_LOG_FORMAT=json` switches to JSON lines. Logs go to
/// stderr so stdout stays free for the transport.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var(ENV_LOG_FORMAT)
        .map(|value| value.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = Registry::default().with(env_filter);
    let result = if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .try_init()
    };

    if let Err(err) = result {
        eprintln!("tracing subscriber already installed: {err}");
    }
}

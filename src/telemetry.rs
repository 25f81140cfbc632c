//! Tracing setup for the generator service.
//!
//! - LOG_LEVEL holds filter directives; unset means `DEFAULT_DIRECTIVES`.
//! - LOG_FORMAT=json switches to one JSON object per event, anything else is the
//!   human-readable format.
//!
//! Pipeline events use the `pipeline` target, service lifecycle events use `itemforge`.

use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_DIRECTIVES: &str = "info,pipeline=debug,itemforge=debug,tower_http=info,axum=info";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    fn from_env_value(raw: Option<&str>) -> Self {
        match raw.map(|v| v.trim().to_ascii_lowercase()) {
            Some(v) if v == "json" => LogFormat::Json,
            _ => LogFormat::Pretty,
        }
    }
}

pub fn init_tracing() {
    let filter = EnvFilter::try_from_env("LOG_LEVEL").unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES));
    let format = LogFormat::from_env_value(std::env::var("LOG_FORMAT").ok().as_deref());

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(true)
        .with_line_number(true);

    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }

    info!(
        target: "itemforge",
        service = env!("CARGO_PKG_NAME"),
        version = env!("CARGO_PKG_VERSION"),
        format = ?format,
        "Tracing initialized"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_json_selects_structured_output() {
        assert_eq!(LogFormat::from_env_value(Some("json")), LogFormat::Json);
        assert_eq!(LogFormat::from_env_value(Some(" JSON ")), LogFormat::Json);
        assert_eq!(LogFormat::from_env_value(Some("pretty")), LogFormat::Pretty);
        assert_eq!(LogFormat::from_env_value(None), LogFormat::Pretty);
    }

    #[test]
    fn default_directives_parse() {
        assert!(DEFAULT_DIRECTIVES.parse::<EnvFilter>().is_ok());
    }
}

/// Environment variable names read by [`Settings::from_env`](crate::config::Settings::from_env).
///
/// These are purely helpers; the rest of the crate only ever sees a
/// [`Settings`](crate::config::Settings) value.

/// Collection (table / index) name.
pub const LOG_TO_DB_COLLECTION_ENV: &str = "LOG_TO_DB_COLLECTION";

/// Name of a custom model registered on the builder.
pub const LOG_TO_DB_MODEL_ENV: &str = "LOG_TO_DB_MODEL";

/// Connection name looked up in the database registry.
pub const LOG_TO_DB_CONNECTION_ENV: &str = "LOG_TO_DB_CONNECTION";

/// `true` to deliver through the job queue.
pub const LOG_TO_DB_QUEUE_ENV: &str = "LOG_TO_DB_QUEUE";

pub const LOG_TO_DB_QUEUE_NAME_ENV: &str = "LOG_TO_DB_QUEUE_NAME";

pub const LOG_TO_DB_QUEUE_CONNECTION_ENV: &str = "LOG_TO_DB_QUEUE_CONNECTION";

/// `false` to drop `context` from stored records.
pub const LOG_TO_DB_DETAILED_ENV: &str = "LOG_TO_DB_DETAILED";

/// chrono strftime pattern for the `datetime` column.
pub const LOG_TO_DB_DATETIME_FORMAT_ENV: &str = "LOG_TO_DB_DATETIME_FORMAT";

pub const LOG_TO_DB_MAX_RECORDS_ENV: &str = "LOG_TO_DB_MAX_RECORDS";

pub const LOG_TO_DB_MAX_HOURS_ENV: &str = "LOG_TO_DB_MAX_HOURS";

/// URL of the default connection, e.g. `sqlite://logs.db`.
pub const LOG_TO_DB_DATABASE_URL_ENV: &str = "LOG_TO_DB_DATABASE_URL";

/// Driver of the default connection; inferred from the URL scheme when unset.
pub const LOG_TO_DB_DATABASE_DRIVER_ENV: &str = "LOG_TO_DB_DATABASE_DRIVER";

pub const LOG_TO_DB_DATABASE_USER_ENV: &str = "LOG_TO_DB_DATABASE_USER";

pub const LOG_TO_DB_DATABASE_PASSWORD_ENV: &str = "LOG_TO_DB_DATABASE_PASSWORD";

/// Read an environment variable or fall back to a provided default.
pub fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Parse the usual spellings of a boolean flag.
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Infer a driver name from a connection URL scheme.
pub fn driver_from_url(url: &str) -> &'static str {
    let lower = url.to_ascii_lowercase();

    if lower.starts_with("postgres://") || lower.starts_with("postgresql://") {
        "postgres"
    } else if lower.starts_with("http://") || lower.starts_with("https://") {
        crate::config::DOCUMENT_DRIVER
    } else {
        "sqlite"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bool_spellings() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool(" off "), Some(false));
        assert_eq!(parse_bool("2"), None);
    }

    #[test]
    fn driver_inference() {
        assert_eq!(driver_from_url("postgresql://db/app"), "postgres");
        assert_eq!(driver_from_url("https://search:9200"), "opensearch");
        assert_eq!(driver_from_url("sqlite://logs.db"), "sqlite");
    }
}

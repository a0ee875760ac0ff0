//! Test helpers and utilities

/// Initialize tracing for tests (call once at start of test)
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("pgbind_core=debug,info")),
        )
        .with_test_writer()
        .try_init();
}

/// A role or database name that no other test uses
pub fn unique_name(prefix: &str) -> String {
    format!("{}_{}", prefix, uuid::Uuid::new_v4().simple())
}

/// A random password
pub fn random_password() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_name_fits_identifier_limit() {
        let name = unique_name("data_owner");
        assert!(name.starts_with("data_owner_"));
        assert!(name.len() <= 63);
        assert_ne!(name, unique_name("data_owner"));
    }
}

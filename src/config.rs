use std::path::PathBuf;

/// Application-level constants
pub const APP_NAME: &str = "GesMed";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default tracing filter when RUST_LOG is not set
pub fn default_log_filter() -> String {
    format!("{}=info", env!("CARGO_PKG_NAME"))
}

/// Get the application data directory, ~/GesMed/ on all platforms
pub fn app_data_dir() -> PathBuf {
    let home = dirs::home_dir().expect("Cannot determine home directory");
    home.join("GesMed")
}

/// Get the path of the medication ledger database
pub fn database_path() -> PathBuf {
    app_data_dir().join("gesmed.db")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_data_dir_under_home() {
        let dir = app_data_dir();
        let home = dirs::home_dir().unwrap();
        assert!(dir.starts_with(home));
        assert!(dir.ends_with("GesMed"));
    }

    #[test]
    fn database_path_under_app_data() {
        let db = database_path();
        assert!(db.starts_with(app_data_dir()));
        assert!(db.ends_with("gesmed.db"));
    }

    #[test]
    fn app_name_is_gesmed() {
        assert_eq!(APP_NAME, "GesMed");
    }

    #[test]
    fn log_filter_targets_crate() {
        assert!(default_log_filter().starts_with("gesmed"));
    }
}

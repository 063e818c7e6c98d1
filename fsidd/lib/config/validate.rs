use crate::{store::is_valid_table_name, FsiddError, FsiddResult};

use super::{Config, DatabaseConfig};

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Config {
    /// Checks that every required setting is present and well formed.
    ///
    /// All problems are reported together. The database settings are only required when the
    /// daemon is not running on the in-memory store.
    pub fn validate(&self) -> FsiddResult<()> {
        let mut errors = Vec::new();

        if self.socket.as_os_str().is_empty() {
            errors.push(required("socket"));
        }

        if !self.memory {
            self.database.validate_into(&mut errors);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(FsiddError::InvalidConfig(errors))
        }
    }
}

impl DatabaseConfig {
    fn validate_into(&self, errors: &mut Vec<String>) {
        if self.url.is_empty() {
            errors.push(required("database.url"));
        }

        if self.table_name.is_empty() {
            errors.push(required("database.table-name"));
        } else if !is_valid_table_name(&self.table_name) {
            errors.push(format!("invalid table name {:?}", self.table_name));
        }

        if self.max_connections == 0 {
            errors.push("database.max-connections must be at least 1".to_string());
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

fn required(name: &str) -> String {
    format!("required: {name:?}")
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

//! Client → server commands.

use crate::error::{Error, Result};
use crate::value::Value;

use super::types::{CommandKind, PreparedHandle};

/// Statement target of a `run` command.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// Plain SQL text, no arguments
    Text(String),
    /// A statement prepared on the current connection
    Prepared(PreparedHandle),
}

/// Administrative sub-commands sent with the `meta` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetaCommand {
    /// List all databases
    ListDatabases,
    /// List tables of the selected database
    ListTables,
    /// Describe key and value columns of a table
    Schema(String),
    /// Reload the user table (admin only)
    ReloadUsers,
    /// Change the password of the logged-in user
    ChangePassword(String),
}

impl MetaCommand {
    /// Argument string of the `meta` command.
    pub fn to_arg(&self) -> String {
        match self {
            MetaCommand::ListDatabases => "list_databases".into(),
            MetaCommand::ListTables => "list_tables".into(),
            MetaCommand::Schema(table) => format!("schema {}", table),
            MetaCommand::ReloadUsers => "reload_users".into(),
            MetaCommand::ChangePassword(password) => format!("chgpasswd {}", password),
        }
    }
}

/// One command record. Each variant carries exactly the payload its kind needs.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Execute a statement
    Run {
        /// SQL text or prepared handle
        statement: Statement,
        /// Bound arguments (empty for SQL text)
        args: Vec<Value>,
        /// Request the server-side result cache
        cache: bool,
    },
    /// Prepare SQL text
    Prepare {
        /// SQL text
        sql: String,
    },
    /// Bulk execute a prepared insert
    Batch {
        /// Prepared handle of the insert
        handle: PreparedHandle,
        /// One argument row per inserted record
        rows: Vec<Vec<Value>>,
    },
    /// Select a database
    Use {
        /// Database name
        database: String,
    },
    /// Authenticate
    Login {
        /// Username
        user: String,
        /// Password
        password: String,
        /// Database to select after login
        database: Option<String>,
    },
    /// Administrative command
    Meta(MetaCommand),
}

/// Reject words the server would split apart.
fn single_word(what: &str, s: &str) -> Result<()> {
    if s.is_empty() || s.contains(char::is_whitespace) {
        return Err(Error::InvalidUsage(format!(
            "{} must be a non-empty word without whitespace",
            what
        )));
    }
    Ok(())
}

impl Command {
    /// Build a `run` command for plain SQL text.
    pub fn run_sql(sql: impl Into<String>, cache: bool) -> Self {
        Command::Run {
            statement: Statement::Text(sql.into()),
            args: Vec::new(),
            cache,
        }
    }

    /// Build a `run` command for a prepared statement.
    pub fn run_prepared(handle: PreparedHandle, args: Vec<Value>, cache: bool) -> Self {
        Command::Run {
            statement: Statement::Prepared(handle),
            args,
            cache,
        }
    }

    /// Build a `batch` command. At least one row is required.
    pub fn batch(handle: PreparedHandle, rows: Vec<Vec<Value>>) -> Result<Self> {
        if rows.is_empty() {
            return Err(Error::InvalidUsage("batch insert requires at least one row".into()));
        }
        Ok(Command::Batch { handle, rows })
    }

    /// Build a `use` command.
    pub fn use_database(database: impl Into<String>) -> Result<Self> {
        let database = database.into();
        single_word("database name", &database)?;
        Ok(Command::Use { database })
    }

    /// Build a `login` command.
    pub fn login(
        user: impl Into<String>,
        password: impl Into<String>,
        database: Option<String>,
    ) -> Result<Self> {
        let user = user.into();
        let password = password.into();
        single_word("username", &user)?;
        single_word("password", &password)?;
        if let Some(database) = &database {
            single_word("database name", database)?;
        }
        Ok(Command::Login {
            user,
            password,
            database,
        })
    }

    /// Build a `meta` command.
    pub fn meta(meta: MetaCommand) -> Result<Self> {
        match &meta {
            MetaCommand::Schema(table) => single_word("table name", table)?,
            MetaCommand::ChangePassword(password) => single_word("password", password)?,
            _ => {}
        }
        Ok(Command::Meta(meta))
    }

    /// Command kind.
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::Run { .. } => CommandKind::Run,
            Command::Prepare { .. } => CommandKind::Prepare,
            Command::Batch { .. } => CommandKind::Batch,
            Command::Use { .. } => CommandKind::Use,
            Command::Login { .. } => CommandKind::Login,
            Command::Meta(_) => CommandKind::Meta,
        }
    }

    /// Session setup replayed after every (re)connect, if any.
    pub fn handshake(
        user: Option<&str>,
        password: Option<&str>,
        database: Option<&str>,
    ) -> Result<Option<Self>> {
        match (user, database) {
            (Some(user), _) => Self::login(
                user,
                password.unwrap_or_default(),
                database.map(str::to_string),
            )
            .map(Some),
            (None, Some(database)) => Self::use_database(database).map(Some),
            (None, None) => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_batch_rejected() {
        assert!(matches!(Command::batch(3, vec![]), Err(Error::InvalidUsage(_))));
    }

    #[test]
    fn test_login_rejects_spaces() {
        assert!(Command::login("bob", "pass word", None).is_err());
        assert!(Command::login("", "pw", None).is_err());
        assert!(Command::login("bob", "pw", Some("test".into())).is_ok());
    }

    #[test]
    fn test_handshake_choice() {
        assert!(matches!(
            Command::handshake(Some("bob"), Some("pw"), Some("db")).unwrap(),
            Some(Command::Login { .. })
        ));
        assert!(matches!(
            Command::handshake(None, None, Some("db")).unwrap(),
            Some(Command::Use { .. })
        ));
        assert_eq!(Command::handshake(None, None, None).unwrap(), None);
    }

    #[test]
    fn test_meta_args() {
        assert_eq!(MetaCommand::Schema("bars".into()).to_arg(), "schema bars");
        assert_eq!(MetaCommand::ListDatabases.to_arg(), "list_databases");
    }
}

//! Synchronous OpenTick connection.

use std::sync::Arc;
use std::time::Duration;

use crate::admin::{self, Perm, UserInfo};
use crate::conversion::{FromRow, ToArgs, ToValue};
use crate::error::{Error, Result};
use crate::opts::Opts;
use crate::payload::{self, TableSchema};
use crate::protocol::command::{Command, MetaCommand};
use crate::protocol::PreparedHandle;
use crate::session::Session;
use crate::state::ConnectionState;
use crate::value::{Row, Value};

use super::future::{PendingResult, RangeResults};

/// Synchronous OpenTick connection.
///
/// All methods take `&self`; one connection can be shared between threads
/// (e.g. in an `Arc`) and requests from different threads are multiplexed
/// on the same socket. Dropping the connection closes it.
#[derive(Debug)]
pub struct Conn {
    session: Arc<Session>,
}

impl Conn {
    /// Connect to an OpenTick server.
    ///
    /// Returns after the login or database selection configured in `opts`
    /// succeeded.
    pub fn new<O: TryInto<Opts>>(opts: O) -> Result<Self>
    where
        Error: From<O::Error>,
    {
        let opts = opts.try_into()?;
        Ok(Self {
            session: Session::connect(opts)?,
        })
    }

    /// Current options, including credentials changed by [`login`](Self::login).
    pub fn opts(&self) -> Opts {
        self.session.opts()
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.session.state()
    }

    /// Returns true if the socket is up and the session set up.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Change the reconnection backoff. `None` or zero disables reconnection.
    pub fn set_auto_reconnect(&self, interval: Option<Duration>) {
        self.session
            .update_opts(|opts| opts.auto_reconnect = interval);
    }

    fn wait_timeout(&self) -> Option<Duration> {
        self.session.timeout()
    }

    fn request(&self, command: &Command) -> Result<PendingResult> {
        Ok(PendingResult::new(self.session.submit(command)?))
    }

    /// Prepare `sql`, reusing the handle cached for this connection.
    pub fn prepare(&self, sql: &str) -> Result<PreparedHandle> {
        if let Some(handle) = self.session.prepared(sql) {
            return Ok(handle);
        }
        let mut pending = self.session.submit(&Command::Prepare { sql: sql.into() })?;
        let handle = payload::handle(pending.wait(self.wait_timeout())?)?;
        tracing::debug!("prepared {:?} as {}", sql, handle);
        self.session
            .remember_prepared(sql, handle, pending.epoch());
        Ok(handle)
    }

    /// Submit `sql` with an explicit result-cache flag.
    ///
    /// Without arguments the SQL text is sent as is; with arguments the
    /// statement is prepared first.
    pub fn submit<A: ToArgs>(&self, sql: &str, args: A, cache: bool) -> Result<PendingResult> {
        let command = if args.arg_count() == 0 {
            Command::run_sql(sql, cache)
        } else {
            Command::run_prepared(self.prepare(sql)?, args.to_args(), cache)
        };
        self.request(&command)
    }

    /// Submit `sql` and return a handle to its result.
    pub fn execute_async<A: ToArgs>(&self, sql: &str, args: A) -> Result<PendingResult> {
        self.submit(sql, args, self.session.use_cache())
    }

    /// Execute `sql` and wait for the rows, bounded by [`Opts::timeout`].
    pub fn execute<A: ToArgs>(&self, sql: &str, args: A) -> Result<Vec<Row>> {
        self.execute_async(sql, args)?.get(self.wait_timeout())
    }

    /// Execute `sql` and decode every row.
    pub fn execute_collect<T: FromRow, A: ToArgs>(&self, sql: &str, args: A) -> Result<Vec<T>> {
        self.execute(sql, args)?
            .iter()
            .map(|row| T::from_row(row))
            .collect()
    }

    /// Execute `sql` and decode the first row, if any.
    pub fn execute_first<T: FromRow, A: ToArgs>(&self, sql: &str, args: A) -> Result<Option<T>> {
        self.execute(sql, args)?
            .first()
            .map(|row| T::from_row(row))
            .transpose()
    }

    /// Submit `sql` once per range, with the range bounds appended to `args`.
    pub fn execute_ranges_async<A: ToArgs, T: ToValue>(
        &self,
        sql: &str,
        args: A,
        ranges: &[(T, T)],
    ) -> Result<RangeResults> {
        let base = args.to_args();
        let parts = ranges
            .iter()
            .map(|(lo, hi)| {
                let mut part = base.clone();
                part.push(lo.to_value());
                part.push(hi.to_value());
                self.execute_async(sql, part)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(RangeResults::new(parts))
    }

    /// Execute `sql` over every range and return the stitched rows.
    ///
    /// See [`split_range`](crate::range::split_range) for building `ranges`.
    pub fn execute_ranges<A: ToArgs, T: ToValue>(
        &self,
        sql: &str,
        args: A,
        ranges: &[(T, T)],
    ) -> Result<Vec<Row>> {
        self.execute_ranges_async(sql, args, ranges)?
            .get(self.wait_timeout())
    }

    /// Submit a prepared insert for all `rows` in one `batch` command.
    pub fn batch_insert_async<A: ToArgs>(&self, sql: &str, rows: &[A]) -> Result<PendingResult> {
        if rows.is_empty() {
            return Err(Error::InvalidUsage("batch insert requires at least one row".into()));
        }
        let handle = self.prepare(sql)?;
        let command = Command::batch(handle, rows.iter().map(ToArgs::to_args).collect())?;
        self.request(&command)
    }

    /// Insert all `rows` in one `batch` command and wait for it.
    pub fn batch_insert<A: ToArgs>(&self, sql: &str, rows: &[A]) -> Result<()> {
        self.batch_insert_async(sql, rows)?
            .wait(self.wait_timeout())
    }

    /// Insert `rows` in batches of at most `batch_size`.
    ///
    /// With `sequential` each batch is awaited before the next is sent,
    /// otherwise all batches are sent first and then awaited.
    pub fn batch_insert_chunked<A: ToArgs>(
        &self,
        sql: &str,
        rows: &[A],
        batch_size: usize,
        sequential: bool,
    ) -> Result<()> {
        if batch_size == 0 {
            return Err(Error::InvalidUsage("batch size must be positive".into()));
        }
        if sequential {
            for chunk in rows.chunks(batch_size) {
                self.batch_insert(sql, chunk)?;
            }
            return Ok(());
        }
        let pending = rows
            .chunks(batch_size)
            .map(|chunk| self.batch_insert_async(sql, chunk))
            .collect::<Result<Vec<_>>>()?;
        for mut part in pending {
            part.wait(self.wait_timeout())?;
        }
        Ok(())
    }

    fn meta(&self, meta: MetaCommand) -> Result<Value> {
        self.request(&Command::meta(meta)?)?
            .get_value(self.wait_timeout())
    }

    /// Authenticate and optionally select a database.
    ///
    /// The credentials are replayed after every reconnect.
    pub fn login(&self, user: &str, password: &str, database: Option<&str>) -> Result<()> {
        let command = Command::login(user, password, database.map(str::to_string))?;
        self.request(&command)?.wait(self.wait_timeout())?;
        self.session.update_opts(|opts| {
            opts.user = Some(user.to_string());
            opts.password = Some(password.to_string());
            if let Some(database) = database {
                opts.database = Some(database.to_string());
            }
        });
        Ok(())
    }

    /// Select a database. The selection is replayed after every reconnect.
    pub fn use_database(&self, database: &str) -> Result<()> {
        self.request(&Command::use_database(database)?)?
            .wait(self.wait_timeout())?;
        self.session
            .update_opts(|opts| opts.database = Some(database.to_string()));
        Ok(())
    }

    /// Names of all databases.
    pub fn list_databases(&self) -> Result<Vec<String>> {
        payload::names(self.meta(MetaCommand::ListDatabases)?)
    }

    /// Names of the tables of the selected database.
    pub fn list_tables(&self) -> Result<Vec<String>> {
        payload::names(self.meta(MetaCommand::ListTables)?)
    }

    /// Key and value columns of `table` in the selected database.
    pub fn schema(&self, table: &str) -> Result<TableSchema> {
        payload::schema(self.meta(MetaCommand::Schema(table.into()))?)
    }

    /// Make the server reload the user table. Requires admin rights.
    pub fn reload_users(&self) -> Result<()> {
        self.meta(MetaCommand::ReloadUsers).map(drop)
    }

    /// Change the password of the logged-in user.
    pub fn change_password(&self, password: &str) -> Result<()> {
        self.meta(MetaCommand::ChangePassword(password.into()))?;
        self.session
            .update_opts(|opts| opts.password = Some(password.to_string()));
        Ok(())
    }

    /// All rows of the user table.
    pub fn list_users(&self) -> Result<Vec<UserInfo>> {
        Ok(self
            .execute_collect(admin::SELECT_USERS, ())?
            .into_iter()
            .map(UserInfo::from_tuple)
            .collect())
    }

    fn find_user(&self, name: &str) -> Result<Option<UserInfo>> {
        Ok(self
            .execute_first(admin::SELECT_USER, (name,))?
            .map(UserInfo::from_tuple))
    }

    /// Create a user without permissions. Fails if the user exists.
    pub fn create_user(&self, name: &str, password: &str) -> Result<()> {
        if name.is_empty() || password.is_empty() {
            return Err(Error::InvalidUsage("username and password required".into()));
        }
        if self.find_user(name)?.is_some() {
            return Err(Error::InvalidUsage(format!("user {} already exists", name)));
        }
        let digest = admin::password_digest(password);
        self.execute(admin::INSERT_USER, (name, digest, false, ""))?;
        self.reload_users()
    }

    /// Delete a user.
    pub fn delete_user(&self, name: &str) -> Result<()> {
        self.execute(admin::DELETE_USER, (name,))?;
        self.reload_users()
    }

    /// Grant (`Some`) or revoke (`None`) database permissions and optionally
    /// change the admin flag of an existing user.
    pub fn update_user(
        &self,
        name: &str,
        perms: &[(&str, Option<Perm>)],
        is_admin: Option<bool>,
    ) -> Result<()> {
        let user = self
            .find_user(name)?
            .ok_or_else(|| Error::InvalidUsage(format!("user {} does not exist", name)))?;
        let perm = admin::merge_perms(&user.perm, perms)?;
        let is_admin = is_admin.unwrap_or(user.is_admin);
        self.execute(
            admin::INSERT_USER,
            (user.name, user.password_digest, is_admin, perm),
        )?;
        self.reload_users()
    }

    /// Close the connection. Pending results fail with a connection error.
    pub fn close(&self) {
        self.session.close();
    }
}

impl Drop for Conn {
    fn drop(&mut self) {
        self.session.close();
    }
}

//! Asynchronous OpenTick connection.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use crate::admin::{self, Perm, UserInfo};
use crate::conversion::{FromRow, ToArgs, ToValue};
use crate::error::{Error, Result};
use crate::opts::Opts;
use crate::payload::{self, TableSchema};
use crate::protocol::PreparedHandle;
use crate::protocol::command::{Command, MetaCommand};
use crate::session::Session;
use crate::state::ConnectionState;
use crate::value::{Row, Value};

use super::future::{PendingResult, RangeResults};

/// Asynchronous OpenTick connection.
///
/// Methods take `&self`, so one connection can serve many tasks at once.
/// Frames are written synchronously on the calling task; they are small
/// and the write lock is only held for one frame.
#[derive(Debug)]
pub struct Conn {
    session: Arc<Session>,
}

impl Conn {
    /// Connect to an OpenTick server.
    ///
    /// The blocking connect and handshake run on the blocking thread pool.
    pub async fn new<O: TryInto<Opts>>(opts: O) -> Result<Self>
    where
        Error: From<O::Error>,
    {
        let opts = opts.try_into()?;
        let session = tokio::task::spawn_blocking(move || Session::connect(opts))
            .await
            .map_err(|e| Error::Io(io::Error::other(e)))??;
        Ok(Self { session })
    }

    /// Current options.
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
    pub async fn prepare(&self, sql: &str) -> Result<PreparedHandle> {
        if let Some(handle) = self.session.prepared(sql) {
            return Ok(handle);
        }
        let mut pending = self.session.submit(&Command::Prepare { sql: sql.into() })?;
        let handle = payload::handle(pending.wait_async(self.wait_timeout()).await?)?;
        tracing::debug!("prepared {:?} as {}", sql, handle);
        self.session
            .remember_prepared(sql, handle, pending.epoch());
        Ok(handle)
    }

    /// Submit `sql` with an explicit result-cache flag.
    pub async fn submit<A: ToArgs>(&self, sql: &str, args: A, cache: bool) -> Result<PendingResult> {
        let command = if args.arg_count() == 0 {
            Command::run_sql(sql, cache)
        } else {
            Command::run_prepared(self.prepare(sql).await?, args.to_args(), cache)
        };
        self.request(&command)
    }

    /// Submit `sql` and return a handle to its result.
    pub async fn execute_async<A: ToArgs>(&self, sql: &str, args: A) -> Result<PendingResult> {
        self.submit(sql, args, self.session.use_cache()).await
    }

    /// Execute `sql` and await the rows, bounded by [`Opts::timeout`].
    pub async fn execute<A: ToArgs>(&self, sql: &str, args: A) -> Result<Vec<Row>> {
        self.execute_async(sql, args)
            .await?
            .get(self.wait_timeout())
            .await
    }

    /// Execute `sql` and decode every row.
    pub async fn execute_collect<T: FromRow, A: ToArgs>(&self, sql: &str, args: A) -> Result<Vec<T>> {
        self.execute(sql, args)
            .await?
            .iter()
            .map(|row| T::from_row(row))
            .collect()
    }

    /// Execute `sql` and decode the first row, if any.
    pub async fn execute_first<T: FromRow, A: ToArgs>(
        &self,
        sql: &str,
        args: A,
    ) -> Result<Option<T>> {
        self.execute(sql, args)
            .await?
            .first()
            .map(|row| T::from_row(row))
            .transpose()
    }

    /// Submit `sql` once per range, with the range bounds appended to `args`.
    pub async fn execute_ranges_async<A: ToArgs, T: ToValue>(
        &self,
        sql: &str,
        args: A,
        ranges: &[(T, T)],
    ) -> Result<RangeResults> {
        let base = args.to_args();
        let mut parts = Vec::with_capacity(ranges.len());
        for (lo, hi) in ranges {
            let mut part = base.clone();
            part.push(lo.to_value());
            part.push(hi.to_value());
            parts.push(self.execute_async(sql, part).await?);
        }
        Ok(RangeResults::new(parts))
    }

    /// Execute `sql` over every range and return the stitched rows.
    pub async fn execute_ranges<A: ToArgs, T: ToValue>(
        &self,
        sql: &str,
        args: A,
        ranges: &[(T, T)],
    ) -> Result<Vec<Row>> {
        self.execute_ranges_async(sql, args, ranges)
            .await?
            .get(self.wait_timeout())
            .await
    }

    /// Submit a prepared insert for all `rows` in one `batch` command.
    pub async fn batch_insert_async<A: ToArgs>(&self, sql: &str, rows: &[A]) -> Result<PendingResult> {
        if rows.is_empty() {
            return Err(Error::InvalidUsage("batch insert requires at least one row".into()));
        }
        let handle = self.prepare(sql).await?;
        let command = Command::batch(handle, rows.iter().map(ToArgs::to_args).collect())?;
        self.request(&command)
    }

    /// Insert all `rows` in one `batch` command and await it.
    pub async fn batch_insert<A: ToArgs>(&self, sql: &str, rows: &[A]) -> Result<()> {
        self.batch_insert_async(sql, rows)
            .await?
            .wait(self.wait_timeout())
            .await
    }

    /// Insert `rows` in batches of at most `batch_size`.
    ///
    /// With `sequential` each batch is awaited before the next is sent,
    /// otherwise all batches are sent first and then awaited.
    pub async fn batch_insert_chunked<A: ToArgs>(
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
                self.batch_insert(sql, chunk).await?;
            }
            return Ok(());
        }
        let mut pending = Vec::new();
        for chunk in rows.chunks(batch_size) {
            pending.push(self.batch_insert_async(sql, chunk).await?);
        }
        for mut part in pending {
            part.wait(self.wait_timeout()).await?;
        }
        Ok(())
    }

    async fn meta(&self, meta: MetaCommand) -> Result<Value> {
        self.request(&Command::meta(meta)?)?
            .get_value(self.wait_timeout())
            .await
    }

    /// Authenticate and optionally select a database.
    pub async fn login(&self, user: &str, password: &str, database: Option<&str>) -> Result<()> {
        let command = Command::login(user, password, database.map(str::to_string))?;
        self.request(&command)?
            .wait(self.wait_timeout())
            .await?;
        self.session.update_opts(|opts| {
            opts.user = Some(user.to_string());
            opts.password = Some(password.to_string());
            if let Some(database) = database {
                opts.database = Some(database.to_string());
            }
        });
        Ok(())
    }

    /// Select a database.
    pub async fn use_database(&self, database: &str) -> Result<()> {
        self.request(&Command::use_database(database)?)?
            .wait(self.wait_timeout())
            .await?;
        self.session
            .update_opts(|opts| opts.database = Some(database.to_string()));
        Ok(())
    }

    /// Names of all databases.
    pub async fn list_databases(&self) -> Result<Vec<String>> {
        payload::names(self.meta(MetaCommand::ListDatabases).await?)
    }

    /// Names of the tables of the selected database.
    pub async fn list_tables(&self) -> Result<Vec<String>> {
        payload::names(self.meta(MetaCommand::ListTables).await?)
    }

    /// Key and value columns of `table`.
    pub async fn schema(&self, table: &str) -> Result<TableSchema> {
        payload::schema(self.meta(MetaCommand::Schema(table.into())).await?)
    }

    /// Make the server reload the user table.
    pub async fn reload_users(&self) -> Result<()> {
        self.meta(MetaCommand::ReloadUsers).await.map(drop)
    }

    /// Change the password of the logged-in user.
    pub async fn change_password(&self, password: &str) -> Result<()> {
        self.meta(MetaCommand::ChangePassword(password.into()))
            .await?;
        self.session
            .update_opts(|opts| opts.password = Some(password.to_string()));
        Ok(())
    }

    /// All rows of the user table.
    pub async fn list_users(&self) -> Result<Vec<UserInfo>> {
        Ok(self
            .execute_collect(admin::SELECT_USERS, ())
            .await?
            .into_iter()
            .map(UserInfo::from_tuple)
            .collect())
    }

    async fn find_user(&self, name: &str) -> Result<Option<UserInfo>> {
        Ok(self
            .execute_first(admin::SELECT_USER, (name,))
            .await?
            .map(UserInfo::from_tuple))
    }

    /// Create a user without permissions. Fails if the user exists.
    pub async fn create_user(&self, name: &str, password: &str) -> Result<()> {
        if name.is_empty() || password.is_empty() {
            return Err(Error::InvalidUsage("username and password required".into()));
        }
        if self.find_user(name).await?.is_some() {
            return Err(Error::InvalidUsage(format!("user {} already exists", name)));
        }
        let digest = admin::password_digest(password);
        self.execute(admin::INSERT_USER, (name, digest, false, ""))
            .await?;
        self.reload_users().await
    }

    /// Delete a user.
    pub async fn delete_user(&self, name: &str) -> Result<()> {
        self.execute(admin::DELETE_USER, (name,)).await?;
        self.reload_users().await
    }

    /// Grant (`Some`) or revoke (`None`) database permissions and optionally
    /// change the admin flag of an existing user.
    pub async fn update_user(
        &self,
        name: &str,
        perms: &[(&str, Option<Perm>)],
        is_admin: Option<bool>,
    ) -> Result<()> {
        let user = self
            .find_user(name)
            .await?
            .ok_or_else(|| Error::InvalidUsage(format!("user {} does not exist", name)))?;
        let perm = admin::merge_perms(&user.perm, perms)?;
        let is_admin = is_admin.unwrap_or(user.is_admin);
        self.execute(
            admin::INSERT_USER,
            (user.name, user.password_digest, is_admin, perm),
        )
        .await?;
        self.reload_users().await
    }

    /// Close the connection. Pending results fail with a connection error.
    ///
    /// Waiting for the dispatch thread to stop runs on the blocking pool.
    pub async fn close(&self) {
        let session = Arc::clone(&self.session);
        if let Err(e) = tokio::task::spawn_blocking(move || session.close()).await {
            tracing::error!("close task failed: {}", e);
        }
    }
}

/// Dropping closes the connection without waiting for the dispatch thread,
/// so it never blocks a runtime worker. Use [`Conn::close`] to wait.
impl Drop for Conn {
    fn drop(&mut self) {
        self.session.close_detached();
    }
}

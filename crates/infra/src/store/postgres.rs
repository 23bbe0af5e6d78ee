//! Postgres-backed record store.
//!
//! Workers are synchronous polling loops, so the store owns a current-thread
//! tokio runtime and drives sqlx futures with `block_on`.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|-----------------------|------------|
//! | Database | `23xxx` (integrity), `22xxx` (data) | `Constraint` |
//! | Database | anything else | `Backend` |
//! | Io, Tls, PoolTimedOut, PoolClosed | N/A | `Connection` |
//! | Other | N/A | `Backend` |
//!
//! Row-level inserts run inside a savepoint so a rejected row leaves the rest
//! of the transaction usable when the row failure policy is `continue`.

use std::sync::Arc;

use sqlx::postgres::{PgArguments, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::{PgConnection, PgPool, Postgres, Row, Transaction};
use tokio::runtime::Runtime;
use tracing::{debug, instrument};

use chatlog_core::{
    ChatId, ChatMessage, CompositeKey, GroupHistoryEntry, GroupInvite, GroupProfile,
    MessageFlags, RowId, UserHistoryEntry, UserId, UserProfile,
};

use super::{RecordStore, StoreError, StoreTx};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS chat_new (
    id        BIGSERIAL PRIMARY KEY,
    chatid    BIGINT NOT NULL,
    messageid BIGINT NOT NULL,
    userid    BIGINT,
    text      TEXT NOT NULL,
    time      BIGINT NOT NULL,
    flag      SMALLINT NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS ix_chat_new_chatid_messageid ON chat_new (chatid, messageid);

CREATE TABLE IF NOT EXISTS users (
    uid        BIGINT PRIMARY KEY,
    username   VARCHAR(32),
    first_name VARCHAR(255),
    last_name  VARCHAR(255),
    lang_code  VARCHAR(10)
);

CREATE TABLE IF NOT EXISTS user_history (
    id         BIGSERIAL PRIMARY KEY,
    uid        BIGINT NOT NULL,
    username   VARCHAR(32),
    first_name VARCHAR(255),
    last_name  VARCHAR(255),
    lang_code  VARCHAR(10),
    date       BIGINT NOT NULL
);
CREATE INDEX IF NOT EXISTS ix_user_history_uid ON user_history (uid);

CREATE TABLE IF NOT EXISTS groups (
    id     BIGINT PRIMARY KEY,
    name   VARCHAR(255) NOT NULL,
    link   VARCHAR(64),
    master BIGINT
);

CREATE TABLE IF NOT EXISTS group_history (
    id   BIGSERIAL PRIMARY KEY,
    gid  BIGINT NOT NULL,
    name VARCHAR(255) NOT NULL,
    link VARCHAR(64),
    date BIGINT NOT NULL
);
CREATE INDEX IF NOT EXISTS ix_group_history_gid ON group_history (gid);

CREATE TABLE IF NOT EXISTS group_invites (
    id      BIGINT PRIMARY KEY,
    gid     BIGINT NOT NULL,
    inviter BIGINT,
    link    VARCHAR(64) NOT NULL,
    date    BIGINT NOT NULL
);
"#;

/// Postgres record store.
///
/// `Send + Sync`; clones share the pool and the runtime.
#[derive(Debug, Clone)]
pub struct PostgresRecordStore {
    pool: PgPool,
    runtime: Arc<Runtime>,
}

impl PostgresRecordStore {
    /// Connect to `url` with a pool of at most `max_connections`.
    pub fn connect(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| StoreError::Backend(format!("failed to start store runtime: {e}")))?;

        let pool = runtime
            .block_on(
                PgPoolOptions::new()
                    .max_connections(max_connections)
                    .connect(url),
            )
            .map_err(|e| map_sqlx_error("connect", e))?;

        Ok(Self {
            pool,
            runtime: Arc::new(runtime),
        })
    }

    /// Create tables and indexes if they do not exist yet.
    #[instrument(skip(self), err)]
    pub fn ensure_schema(&self) -> Result<(), StoreError> {
        self.runtime
            .block_on(sqlx::raw_sql(SCHEMA).execute(&self.pool))
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        debug!("schema ready");
        Ok(())
    }
}

impl RecordStore for PostgresRecordStore {
    fn begin(&self) -> Result<Box<dyn StoreTx + '_>, StoreError> {
        let tx = self
            .runtime
            .block_on(self.pool.begin())
            .map_err(|e| map_sqlx_error("begin", e))?;
        Ok(Box::new(PgTx {
            runtime: &self.runtime,
            tx: Some(tx),
        }))
    }
}

struct PgTx<'a> {
    runtime: &'a Runtime,
    tx: Option<Transaction<'static, Postgres>>,
}

impl<'a> PgTx<'a> {
    fn parts(&mut self) -> Result<(&'a Runtime, &mut PgConnection), StoreError> {
        let runtime = self.runtime;
        let tx = self
            .tx
            .as_mut()
            .ok_or_else(|| StoreError::Backend("transaction already finished".to_string()))?;
        Ok((runtime, &mut **tx))
    }
}

impl Drop for PgTx<'_> {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = self.runtime.block_on(tx.rollback());
        }
    }
}

/// Run a single-row write inside a savepoint.
async fn with_savepoint<'q>(
    conn: &mut PgConnection,
    query: Query<'q, Postgres, PgArguments>,
) -> Result<Option<PgRow>, sqlx::Error> {
    sqlx::query("SAVEPOINT row_write").execute(&mut *conn).await?;
    match query.fetch_optional(&mut *conn).await {
        Ok(row) => {
            sqlx::query("RELEASE SAVEPOINT row_write")
                .execute(&mut *conn)
                .await?;
            Ok(row)
        }
        Err(err) => {
            sqlx::query("ROLLBACK TO SAVEPOINT row_write")
                .execute(&mut *conn)
                .await?;
            Err(err)
        }
    }
}

impl StoreTx for PgTx<'_> {
    #[instrument(skip(self, message), fields(key = %message.key()), err)]
    fn insert_message(&mut self, message: &ChatMessage) -> Result<RowId, StoreError> {
        let (rt, conn) = self.parts()?;
        let query = sqlx::query(
            r#"
            INSERT INTO chat_new (chatid, messageid, userid, text, time, flag)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id
            "#,
        )
        .bind(message.chat_id.get())
        .bind(message.message_id.get())
        .bind(message.user_id.map(UserId::get))
        .bind(&message.text)
        .bind(message.date)
        .bind(message.flag.bits());

        let row = rt
            .block_on(with_savepoint(conn, query))
            .map_err(|e| map_sqlx_error("insert_message", e))?
            .ok_or_else(|| StoreError::Backend("insert returned no id".to_string()))?;
        let id: i64 = row
            .try_get("id")
            .map_err(|e| map_sqlx_error("insert_message", e))?;
        Ok(RowId::new(id))
    }

    fn count_messages(&mut self, key: CompositeKey) -> Result<u64, StoreError> {
        let (rt, conn) = self.parts()?;
        let row = rt
            .block_on(
                sqlx::query("SELECT COUNT(*) FROM chat_new WHERE chatid = $1 AND messageid = $2")
                    .bind(key.chat_id.get())
                    .bind(key.message_id.get())
                    .fetch_one(conn),
            )
            .map_err(|e| map_sqlx_error("count_messages", e))?;
        let count: i64 = row
            .try_get(0)
            .map_err(|e| map_sqlx_error("count_messages", e))?;
        Ok(count.max(0) as u64)
    }

    fn set_message_flags(
        &mut self,
        key: CompositeKey,
        bits: MessageFlags,
    ) -> Result<u64, StoreError> {
        let (rt, conn) = self.parts()?;
        let result = rt
            .block_on(
                sqlx::query(
                    "UPDATE chat_new SET flag = flag | $3 WHERE chatid = $1 AND messageid = $2",
                )
                .bind(key.chat_id.get())
                .bind(key.message_id.get())
                .bind(bits.bits())
                .execute(conn),
            )
            .map_err(|e| map_sqlx_error("set_message_flags", e))?;
        Ok(result.rows_affected())
    }

    fn find_user(&mut self, uid: UserId) -> Result<Option<UserProfile>, StoreError> {
        let (rt, conn) = self.parts()?;
        let row = rt
            .block_on(
                sqlx::query(
                    "SELECT uid, username, first_name, last_name, lang_code FROM users WHERE uid = $1",
                )
                .bind(uid.get())
                .fetch_optional(conn),
            )
            .map_err(|e| map_sqlx_error("find_user", e))?;
        row.map(|r| user_from_row(&r))
            .transpose()
            .map_err(|e| map_sqlx_error("find_user", e))
    }

    fn insert_user(&mut self, user: &UserProfile) -> Result<(), StoreError> {
        let (rt, conn) = self.parts()?;
        let query = sqlx::query(
            r#"
            INSERT INTO users (uid, username, first_name, last_name, lang_code)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(user.uid.get())
        .bind(&user.username)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.lang_code);
        rt.block_on(with_savepoint(conn, query))
            .map_err(|e| map_sqlx_error("insert_user", e))?;
        Ok(())
    }

    fn update_user(&mut self, user: &UserProfile) -> Result<(), StoreError> {
        let (rt, conn) = self.parts()?;
        rt.block_on(
            sqlx::query(
                r#"
                UPDATE users
                SET username = $2, first_name = $3, last_name = $4, lang_code = $5
                WHERE uid = $1
                "#,
            )
            .bind(user.uid.get())
            .bind(&user.username)
            .bind(&user.first_name)
            .bind(&user.last_name)
            .bind(&user.lang_code)
            .execute(conn),
        )
        .map_err(|e| map_sqlx_error("update_user", e))?;
        Ok(())
    }

    fn has_user_history(&mut self, uid: UserId) -> Result<bool, StoreError> {
        let (rt, conn) = self.parts()?;
        let row = rt
            .block_on(
                sqlx::query("SELECT EXISTS (SELECT 1 FROM user_history WHERE uid = $1)")
                    .bind(uid.get())
                    .fetch_one(conn),
            )
            .map_err(|e| map_sqlx_error("has_user_history", e))?;
        row.try_get(0)
            .map_err(|e| map_sqlx_error("has_user_history", e))
    }

    fn append_user_history(&mut self, entry: &UserHistoryEntry) -> Result<(), StoreError> {
        let (rt, conn) = self.parts()?;
        rt.block_on(
            sqlx::query(
                r#"
                INSERT INTO user_history (uid, username, first_name, last_name, lang_code, date)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(entry.uid.get())
            .bind(&entry.username)
            .bind(&entry.first_name)
            .bind(&entry.last_name)
            .bind(&entry.lang_code)
            .bind(entry.date)
            .execute(conn),
        )
        .map_err(|e| map_sqlx_error("append_user_history", e))?;
        Ok(())
    }

    fn find_group(&mut self, gid: ChatId) -> Result<Option<GroupProfile>, StoreError> {
        let (rt, conn) = self.parts()?;
        let row = rt
            .block_on(
                sqlx::query("SELECT id, name, link, master FROM groups WHERE id = $1")
                    .bind(gid.get())
                    .fetch_optional(conn),
            )
            .map_err(|e| map_sqlx_error("find_group", e))?;
        row.map(|r| group_from_row(&r))
            .transpose()
            .map_err(|e| map_sqlx_error("find_group", e))
    }

    fn insert_group(&mut self, group: &GroupProfile) -> Result<(), StoreError> {
        let (rt, conn) = self.parts()?;
        let query = sqlx::query("INSERT INTO groups (id, name, link, master) VALUES ($1, $2, $3, $4)")
            .bind(group.gid.get())
            .bind(&group.name)
            .bind(&group.link)
            .bind(group.master.map(UserId::get));
        rt.block_on(with_savepoint(conn, query))
            .map_err(|e| map_sqlx_error("insert_group", e))?;
        Ok(())
    }

    fn update_group(&mut self, group: &GroupProfile) -> Result<(), StoreError> {
        let (rt, conn) = self.parts()?;
        rt.block_on(
            sqlx::query("UPDATE groups SET name = $2, link = $3, master = $4 WHERE id = $1")
                .bind(group.gid.get())
                .bind(&group.name)
                .bind(&group.link)
                .bind(group.master.map(UserId::get))
                .execute(conn),
        )
        .map_err(|e| map_sqlx_error("update_group", e))?;
        Ok(())
    }

    fn set_group_master(&mut self, gid: ChatId, master: UserId) -> Result<(), StoreError> {
        let (rt, conn) = self.parts()?;
        rt.block_on(
            sqlx::query("UPDATE groups SET master = $2 WHERE id = $1")
                .bind(gid.get())
                .bind(master.get())
                .execute(conn),
        )
        .map_err(|e| map_sqlx_error("set_group_master", e))?;
        Ok(())
    }

    fn has_group_history(&mut self, gid: ChatId) -> Result<bool, StoreError> {
        let (rt, conn) = self.parts()?;
        let row = rt
            .block_on(
                sqlx::query("SELECT EXISTS (SELECT 1 FROM group_history WHERE gid = $1)")
                    .bind(gid.get())
                    .fetch_one(conn),
            )
            .map_err(|e| map_sqlx_error("has_group_history", e))?;
        row.try_get(0)
            .map_err(|e| map_sqlx_error("has_group_history", e))
    }

    fn append_group_history(&mut self, entry: &GroupHistoryEntry) -> Result<(), StoreError> {
        let (rt, conn) = self.parts()?;
        rt.block_on(
            sqlx::query("INSERT INTO group_history (gid, name, link, date) VALUES ($1, $2, $3, $4)")
                .bind(entry.gid.get())
                .bind(&entry.name)
                .bind(&entry.link)
                .bind(entry.date)
                .execute(conn),
        )
        .map_err(|e| map_sqlx_error("append_group_history", e))?;
        Ok(())
    }

    #[instrument(skip(self, invite), fields(invite_id = invite.id), err)]
    fn insert_invite(&mut self, invite: &GroupInvite) -> Result<(), StoreError> {
        let (rt, conn) = self.parts()?;
        let query = sqlx::query(
            "INSERT INTO group_invites (id, gid, inviter, link, date) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(invite.id)
        .bind(invite.gid.get())
        .bind(invite.inviter.map(UserId::get))
        .bind(&invite.link)
        .bind(invite.date);
        rt.block_on(with_savepoint(conn, query))
            .map_err(|e| map_sqlx_error("insert_invite", e))?;
        Ok(())
    }

    fn commit(mut self: Box<Self>) -> Result<(), StoreError> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| StoreError::Backend("transaction already finished".to_string()))?;
        self.runtime
            .block_on(tx.commit())
            .map_err(|e| StoreError::Commit(e.to_string()))
    }

    fn rollback(mut self: Box<Self>) -> Result<(), StoreError> {
        match self.tx.take() {
            Some(tx) => self
                .runtime
                .block_on(tx.rollback())
                .map_err(|e| map_sqlx_error("rollback", e)),
            None => Ok(()),
        }
    }
}

fn user_from_row(row: &PgRow) -> Result<UserProfile, sqlx::Error> {
    Ok(UserProfile {
        uid: UserId::new(row.try_get("uid")?),
        username: row.try_get("username")?,
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        lang_code: row.try_get("lang_code")?,
    })
}

fn group_from_row(row: &PgRow) -> Result<GroupProfile, sqlx::Error> {
    let master: Option<i64> = row.try_get("master")?;
    Ok(GroupProfile {
        gid: ChatId::new(row.try_get("id")?),
        name: row.try_get("name")?,
        link: row.try_get("link")?,
        master: master.map(UserId::new),
    })
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code() {
                Some(code) if is_row_level(code.as_ref()) => StoreError::Constraint(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::Io(e) => StoreError::Connection(format!("{operation}: {e}")),
        sqlx::Error::Tls(e) => StoreError::Connection(format!("{operation}: {e}")),
        sqlx::Error::PoolTimedOut => {
            StoreError::Connection(format!("{operation}: connection pool timed out"))
        }
        sqlx::Error::PoolClosed => {
            StoreError::Connection(format!("{operation}: connection pool closed"))
        }
        other => StoreError::Backend(format!("{operation}: {other}")),
    }
}

/// Integrity (23) and data (22) violations are caused by the row itself.
fn is_row_level(code: &str) -> bool {
    code.starts_with("23") || code.starts_with("22")
}

//! SQLite-backed `PresenceStore` with durable persistence.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::{
    domain::{ChannelId, CommunityDefaults, CommunityId, MemberId, Platform, RoleId, SubscriberKey, SubscriberRecord},
    errors::Error,
    store::PresenceStore,
    Result,
};

const RECORD_COLUMNS: &str = "guild_id, member_id, platform, account_id, account_username, \
     channel_id, role_id, category_filter, is_live";

/// Persistent SQLite store.
///
/// A connection is opened per operation; SQLite serializes writers and the
/// busy timeout absorbs short contention.
#[derive(Debug)]
pub struct SqliteStore {
    db_path: PathBuf,
}

type RawRecord = (
    String,
    String,
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    i64,
);

impl SqliteStore {
    /// Opens (or creates) the database at `path` and ensures the schema exists.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let db_path = path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let store = Self { db_path };
        let connection = store.open_connection()?;
        store.initialize_schema(&connection)?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn open_connection(&self) -> Result<Connection> {
        let connection = Connection::open(&self.db_path)?;
        connection.busy_timeout(Duration::from_secs(5))?;
        connection.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            "#,
        )?;
        Ok(connection)
    }

    fn initialize_schema(&self, connection: &Connection) -> Result<()> {
        connection.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS streamers (
                guild_id TEXT NOT NULL,
                member_id TEXT NOT NULL,
                platform TEXT NOT NULL,
                account_id TEXT NOT NULL,
                account_username TEXT NOT NULL,
                channel_id TEXT NULL,
                role_id TEXT NULL,
                category_filter TEXT NULL,
                is_live INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (guild_id, member_id, platform)
            );

            CREATE INDEX IF NOT EXISTS idx_streamers_account
                ON streamers (platform, account_id);

            CREATE TABLE IF NOT EXISTS guild_settings (
                guild_id TEXT PRIMARY KEY,
                channel_id TEXT NULL,
                role_id TEXT NULL
            );
            "#,
        )?;
        Ok(())
    }

    fn query_records(
        &self,
        where_clause: &str,
        args: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<SubscriberRecord>> {
        let connection = self.open_connection()?;
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM streamers {where_clause} \
             ORDER BY guild_id, member_id, platform"
        );
        let mut statement = connection.prepare(&sql)?;
        let rows = statement
            .query_map(args, raw_record)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.into_iter().map(record_from_raw).collect()
    }
}

#[async_trait]
impl PresenceStore for SqliteStore {
    async fn insert_if_absent(&self, record: &SubscriberRecord) -> Result<bool> {
        let connection = self.open_connection()?;
        let inserted = connection.execute(
            r#"
            INSERT OR IGNORE INTO streamers (
                guild_id, member_id, platform, account_id, account_username,
                channel_id, role_id, category_filter, is_live
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                record.key.community.as_str(),
                record.key.subscriber.as_str(),
                record.key.platform.as_str(),
                record.account_id,
                record.account_username,
                record.channel_id.as_ref().map(ChannelId::as_str),
                record.role_id.as_ref().map(RoleId::as_str),
                record.category_filter,
                i64::from(record.is_live),
            ],
        )?;
        Ok(inserted == 1)
    }

    async fn get(&self, key: &SubscriberKey) -> Result<Option<SubscriberRecord>> {
        let connection = self.open_connection()?;
        let raw = connection
            .query_row(
                &format!(
                    "SELECT {RECORD_COLUMNS} FROM streamers \
                     WHERE guild_id = ?1 AND member_id = ?2 AND platform = ?3"
                ),
                params![
                    key.community.as_str(),
                    key.subscriber.as_str(),
                    key.platform.as_str()
                ],
                raw_record,
            )
            .optional()?;
        raw.map(record_from_raw).transpose()
    }

    async fn find_by_account(
        &self,
        platform: Platform,
        account_id: &str,
    ) -> Result<Vec<SubscriberRecord>> {
        self.query_records(
            "WHERE platform = ?1 AND account_id = ?2",
            params![platform.as_str(), account_id],
        )
    }

    async fn list_all(&self) -> Result<Vec<SubscriberRecord>> {
        self.query_records("", params![])
    }

    async fn list_community(&self, community: &CommunityId) -> Result<Vec<SubscriberRecord>> {
        self.query_records("WHERE guild_id = ?1", params![community.as_str()])
    }

    async fn set_targets(
        &self,
        key: &SubscriberKey,
        channel_id: Option<&ChannelId>,
        role_id: Option<&RoleId>,
    ) -> Result<()> {
        let connection = self.open_connection()?;
        let changed = connection.execute(
            r#"
            UPDATE streamers SET channel_id = ?1, role_id = ?2
            WHERE guild_id = ?3 AND member_id = ?4 AND platform = ?5
            "#,
            params![
                channel_id.map(ChannelId::as_str),
                role_id.map(RoleId::as_str),
                key.community.as_str(),
                key.subscriber.as_str(),
                key.platform.as_str(),
            ],
        )?;
        if changed == 0 {
            return Err(Error::NotFound(format!("subscriber {key}")));
        }
        Ok(())
    }

    async fn compare_and_set_live(
        &self,
        key: &SubscriberKey,
        expected: bool,
        live: bool,
    ) -> Result<bool> {
        let connection = self.open_connection()?;
        let changed = connection.execute(
            r#"
            UPDATE streamers SET is_live = ?1
            WHERE guild_id = ?2 AND member_id = ?3 AND platform = ?4 AND is_live = ?5
            "#,
            params![
                i64::from(live),
                key.community.as_str(),
                key.subscriber.as_str(),
                key.platform.as_str(),
                i64::from(expected),
            ],
        )?;
        Ok(changed == 1)
    }

    async fn retarget_community(
        &self,
        community: &CommunityId,
        channel_id: Option<&ChannelId>,
        role_id: Option<&RoleId>,
    ) -> Result<usize> {
        let connection = self.open_connection()?;
        let changed = connection.execute(
            r#"
            UPDATE streamers SET
                channel_id = COALESCE(?1, channel_id),
                role_id = COALESCE(?2, role_id)
            WHERE guild_id = ?3
            "#,
            params![
                channel_id.map(ChannelId::as_str),
                role_id.map(RoleId::as_str),
                community.as_str(),
            ],
        )?;
        Ok(changed)
    }

    async fn set_category_filter(
        &self,
        community: &CommunityId,
        subscriber: &MemberId,
        filter: Option<&str>,
    ) -> Result<usize> {
        let connection = self.open_connection()?;
        let changed = connection.execute(
            "UPDATE streamers SET category_filter = ?1 WHERE guild_id = ?2 AND member_id = ?3",
            params![filter, community.as_str(), subscriber.as_str()],
        )?;
        Ok(changed)
    }

    async fn remove(
        &self,
        community: &CommunityId,
        subscriber: &MemberId,
    ) -> Result<Vec<SubscriberKey>> {
        let mut connection = self.open_connection()?;
        let transaction = connection.transaction()?;
        let platforms = {
            let mut statement = transaction.prepare(
                "SELECT platform FROM streamers WHERE guild_id = ?1 AND member_id = ?2",
            )?;
            let platforms = statement
                .query_map(params![community.as_str(), subscriber.as_str()], |row| {
                    row.get::<_, String>(0)
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            platforms
        };
        transaction.execute(
            "DELETE FROM streamers WHERE guild_id = ?1 AND member_id = ?2",
            params![community.as_str(), subscriber.as_str()],
        )?;
        transaction.commit()?;

        platforms
            .iter()
            .map(|p| {
                Ok(SubscriberKey::new(
                    community.clone(),
                    subscriber.clone(),
                    p.parse::<Platform>()?,
                ))
            })
            .collect()
    }

    async fn community_defaults(
        &self,
        community: &CommunityId,
    ) -> Result<Option<CommunityDefaults>> {
        let connection = self.open_connection()?;
        let row = connection
            .query_row(
                "SELECT channel_id, role_id FROM guild_settings WHERE guild_id = ?1",
                params![community.as_str()],
                |row| Ok((row.get::<_, Option<String>>(0)?, row.get::<_, Option<String>>(1)?)),
            )
            .optional()?;
        Ok(row.map(|(channel_id, role_id)| CommunityDefaults {
            community: community.clone(),
            channel_id: channel_id.map(ChannelId),
            role_id: role_id.map(RoleId),
        }))
    }

    async fn set_community_defaults(&self, defaults: &CommunityDefaults) -> Result<()> {
        let connection = self.open_connection()?;
        connection.execute(
            r#"
            INSERT INTO guild_settings (guild_id, channel_id, role_id) VALUES (?1, ?2, ?3)
            ON CONFLICT(guild_id) DO UPDATE SET
                channel_id = excluded.channel_id,
                role_id = excluded.role_id
            "#,
            params![
                defaults.community.as_str(),
                defaults.channel_id.as_ref().map(ChannelId::as_str),
                defaults.role_id.as_ref().map(RoleId::as_str),
            ],
        )?;
        Ok(())
    }
}

fn raw_record(row: &Row<'_>) -> rusqlite::Result<RawRecord> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
    ))
}

fn record_from_raw(raw: RawRecord) -> Result<SubscriberRecord> {
    let (guild, member, platform, account_id, account_username, channel, role, filter, live) = raw;
    Ok(SubscriberRecord {
        key: SubscriberKey::new(CommunityId(guild), MemberId(member), platform.parse()?),
        account_id,
        account_username,
        channel_id: channel.map(ChannelId),
        role_id: role.map(RoleId),
        category_filter: filter,
        is_live: live != 0,
    })
}

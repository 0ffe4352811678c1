#![allow(dead_code)]

use rusqlite::{Connection, params};
use std::path::{Path, PathBuf};

pub const LEGACY_VARS: &[&str] = &[
    "DB_PATH",
    "ARCHIVE_PATH",
    "MD_PATH",
    "SUMMARY_TIME",
    "INTERVAL_HOURS",
    "CHUNK_SIZE",
    "WORD_LIMIT",
    "LITELLM_URL",
    "LITELLM_API_KEY",
    "BASE_MODEL",
    "LLM_TIMEOUT",
    "ANYTHING_LLM_HOST",
    "ANYTHING_LLM_API_KEY",
    "RATE_LIMIT_SLEEP",
    "ARCHIVIST_MODEL_URL",
    "ARCHIVIST_REMOTE_URL",
    "ARCHIVIST_DB_PATH",
    "ARCHIVIST_SNAPSHOT_DIR",
    "ARCHIVIST_SUMMARY_DIR",
];

pub struct Fixture {
    pub home: PathBuf,
    pub conn: Connection,
}

impl Fixture {
    pub fn new(home: &Path) -> Self {
        let conn = Connection::open(home.join("anythingllm.db")).expect("open fixture db");
        conn.execute_batch(
            "CREATE TABLE workspaces (id INTEGER PRIMARY KEY, name TEXT, slug TEXT);
             CREATE TABLE workspace_threads (id INTEGER PRIMARY KEY, name TEXT, workspace_id INTEGER);
             CREATE TABLE workspace_chats (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 workspaceId INTEGER,
                 thread_id INTEGER,
                 prompt TEXT,
                 response TEXT,
                 createdAt INTEGER
             );",
        )
        .expect("create schema");
        Self {
            home: home.to_path_buf(),
            conn,
        }
    }

    pub fn group(&self, id: i64, name: &str, slug: &str) -> &Self {
        self.conn
            .execute(
                "INSERT INTO workspaces (id, name, slug) VALUES (?1, ?2, ?3)",
                params![id, name, slug],
            )
            .expect("insert workspace");
        self
    }

    pub fn thread(&self, id: i64, group: i64, name: &str) -> &Self {
        self.conn
            .execute(
                "INSERT INTO workspace_threads (id, name, workspace_id) VALUES (?1, ?2, ?3)",
                params![id, name, group],
            )
            .expect("insert thread");
        self
    }

    pub fn drop_thread(&self, id: i64) {
        self.conn
            .execute("DELETE FROM workspace_threads WHERE id = ?1", params![id])
            .expect("delete thread");
        self.conn
            .execute("DELETE FROM workspace_chats WHERE thread_id = ?1", params![id])
            .expect("delete chats");
    }

    pub fn chat(&self, group: i64, thread: Option<i64>, prompt: &str, created_at: i64) -> &Self {
        self.conn
            .execute(
                "INSERT INTO workspace_chats (workspaceId, thread_id, prompt, response, createdAt) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    group,
                    thread,
                    prompt,
                    r#"{"text":"noted","sources":[]}"#,
                    created_at
                ],
            )
            .expect("insert chat");
        self
    }

    pub fn snapshot_dir(&self) -> PathBuf {
        self.home.join("archives")
    }

    pub fn summary_dir(&self) -> PathBuf {
        self.home.join("markdowns")
    }
}

pub fn archivist(home: &Path) -> assert_cmd::Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("archivist");
    cmd.current_dir(home)
        .env("ARCHIVIST_HOME", home)
        .env("ARCHIVIST_CONFIG_PATH", home.join("archivist.toml"))
        .env("ARCHIVIST_RATE_LIMIT_SECS", "0")
        .env("ARCHIVIST_BLOCK_PAUSE_MS", "0")
        .env("ARCHIVIST_LOG", "warn");
    for var in LEGACY_VARS {
        cmd.env_remove(var);
    }
    cmd
}

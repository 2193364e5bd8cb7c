//! Database schema definitions.

pub const SCHEMA_VERSION: i32 = 1;

const SCHEMA_VERSION_TABLE: &str = "
CREATE TABLE IF NOT EXISTS schema_version (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    version INTEGER NOT NULL,
    updated_at TEXT NOT NULL
);
";

const INSTANCE_TABLE: &str = "
CREATE TABLE IF NOT EXISTS instance (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    creator_id INTEGER NOT NULL,
    created_ts INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
    name TEXT NOT NULL UNIQUE,
    engine TEXT NOT NULL,
    host TEXT NOT NULL,
    port TEXT NOT NULL DEFAULT '',
    username TEXT NOT NULL DEFAULT ''
);
";

const DATABASE_TABLE: &str = "
CREATE TABLE IF NOT EXISTS db (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    creator_id INTEGER NOT NULL,
    created_ts INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
    instance_id INTEGER NOT NULL REFERENCES instance (id),
    name TEXT NOT NULL,
    UNIQUE (instance_id, name)
);
";

const PIPELINE_TABLE: &str = "
CREATE TABLE IF NOT EXISTS pipeline (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    creator_id INTEGER NOT NULL,
    created_ts INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
    updater_id INTEGER NOT NULL,
    updated_ts INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
    name TEXT NOT NULL,
    status TEXT NOT NULL CHECK (status IN ('OPEN', 'DONE', 'CANCELED'))
);

CREATE INDEX IF NOT EXISTS idx_pipeline_status ON pipeline (status);
";

const STAGE_TABLE: &str = "
CREATE TABLE IF NOT EXISTS stage (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    creator_id INTEGER NOT NULL,
    created_ts INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
    updater_id INTEGER NOT NULL,
    updated_ts INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
    pipeline_id INTEGER NOT NULL REFERENCES pipeline (id),
    position INTEGER NOT NULL,
    name TEXT NOT NULL,
    UNIQUE (pipeline_id, position)
);
";

// At most one RUNNING task per (instance, database) and one RUNNING run per
// task. The partial unique indexes hold even across scheduler replicas.
const TASK_TABLE: &str = "
CREATE TABLE IF NOT EXISTS task (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    creator_id INTEGER NOT NULL,
    created_ts INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
    updater_id INTEGER NOT NULL,
    updated_ts INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
    pipeline_id INTEGER NOT NULL REFERENCES pipeline (id),
    stage_id INTEGER NOT NULL REFERENCES stage (id),
    instance_id INTEGER NOT NULL REFERENCES instance (id),
    database_id INTEGER NULL REFERENCES db (id),
    name TEXT NOT NULL,
    status TEXT NOT NULL CHECK (status IN ('PENDING_APPROVAL', 'PENDING', 'RUNNING', 'DONE', 'FAILED', 'CANCELED')),
    type TEXT NOT NULL,
    payload TEXT NOT NULL DEFAULT '{}'
);

CREATE INDEX IF NOT EXISTS idx_task_pipeline_id ON task (pipeline_id);
CREATE INDEX IF NOT EXISTS idx_task_stage_id ON task (stage_id);
CREATE INDEX IF NOT EXISTS idx_task_status ON task (status);
CREATE UNIQUE INDEX IF NOT EXISTS uk_task_running_target
    ON task (instance_id, IFNULL(database_id, -1)) WHERE status = 'RUNNING';
";

const TASK_RUN_TABLE: &str = "
CREATE TABLE IF NOT EXISTS task_run (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    creator_id INTEGER NOT NULL,
    created_ts INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
    updater_id INTEGER NOT NULL,
    updated_ts INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
    task_id INTEGER NOT NULL REFERENCES task (id),
    attempt INTEGER NOT NULL,
    name TEXT NOT NULL,
    status TEXT NOT NULL CHECK (status IN ('RUNNING', 'DONE', 'FAILED', 'CANCELED')),
    result TEXT NULL,
    comment TEXT NOT NULL DEFAULT '',
    started_ts INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
    ended_ts INTEGER NULL,
    UNIQUE (task_id, attempt)
);

CREATE UNIQUE INDEX IF NOT EXISTS uk_task_run_running
    ON task_run (task_id) WHERE status = 'RUNNING';
";

const BACKUP_TABLE: &str = "
CREATE TABLE IF NOT EXISTS backup (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    creator_id INTEGER NOT NULL,
    created_ts INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
    updater_id INTEGER NOT NULL,
    updated_ts INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
    database_id INTEGER NOT NULL REFERENCES db (id),
    name TEXT NOT NULL,
    status TEXT NOT NULL CHECK (status IN ('PENDING', 'DONE', 'FAILED')),
    type TEXT NOT NULL,
    storage_backend TEXT NOT NULL,
    migration_history_version TEXT NOT NULL DEFAULT '',
    path TEXT NOT NULL,
    comment TEXT NOT NULL DEFAULT '',
    payload TEXT NOT NULL DEFAULT '',
    UNIQUE (database_id, name)
);
";

pub fn all_schemas() -> &'static [&'static str] {
    &[
        SCHEMA_VERSION_TABLE,
        INSTANCE_TABLE,
        DATABASE_TABLE,
        PIPELINE_TABLE,
        STAGE_TABLE,
        TASK_TABLE,
        TASK_RUN_TABLE,
        BACKUP_TABLE,
    ]
}

//! Built-in probe battery.
//!
//! | probe | source views |
//! |---|---|
//! | `sessions` | `v$session` |
//! | `tablespaces` | `dba_free_space`, `dba_data_files`, `dba_tablespaces`, `v$undostat` |
//! | `archivelog` | `gv$archived_log` |
//! | `resource_limit` | `v$resource_limit` |

use std::sync::Arc;

use crate::config::CollectConfig;
use crate::decode::MetricColumn;
use crate::error::ProbeError;
use crate::probe::{Probe, ProbeSpec, QuerySpec, ShapeSpec};
use crate::registry::MetricRegistry;

pub const SESSIONS: &str = "sessions";
pub const TABLESPACES: &str = "tablespaces";
pub const ARCHIVELOG: &str = "archivelog";
pub const RESOURCE_LIMIT: &str = "resource_limit";

/// Names of all built-in probes.
pub const BUILTIN_PROBES: [&str; 4] = [SESSIONS, TABLESPACES, ARCHIVELOG, RESOURCE_LIMIT];

/// Minimal status query run before any probe.
pub const LIVENESS_QUERY: &str = "SELECT status FROM v$instance";

pub const SESSION_COUNT_QUERY: &str = "
    SELECT 'user_sessions' session_type, COUNT(*) cnt
      FROM v$session
     WHERE type = 'USER'
    UNION ALL
    SELECT 'background_sessions' session_type, COUNT(*) cnt
      FROM v$session
     WHERE type <> 'USER'";

pub const ACTIVE_USER_SESSION_QUERY: &str = "
    SELECT COUNT(*) active_user_sessions
      FROM v$session
     WHERE type = 'USER'
       AND status = 'ACTIVE'";

pub const TABLESPACE_USAGE_QUERY: &str = "
    SELECT a.tablespace_name,
           b.tbs_size size_bytes,
           a.free free_bytes,
           b.max_size max_size_bytes,
           a.free + (b.max_size - b.tbs_size) max_free_bytes
      FROM (SELECT tablespace_name, SUM(bytes) free
              FROM dba_free_space
             GROUP BY tablespace_name) a,
           (SELECT tablespace_name,
                   SUM(bytes) tbs_size,
                   SUM(GREATEST(bytes, maxbytes)) max_size
              FROM dba_data_files
             GROUP BY tablespace_name) b,
           (SELECT tablespace_name
              FROM dba_tablespaces
             WHERE contents = 'PERMANENT') c
     WHERE a.tablespace_name = b.tablespace_name
       AND b.tablespace_name = c.tablespace_name
    UNION ALL
    SELECT par.tablespace_name,
           fs.tbs_size size_bytes,
           fs.tbs_size - blk.block_size * (ext.activeblks + ext.unexpiredblks) free_bytes,
           fs.tbs_max_size max_size_bytes,
           fs.tbs_max_size - blk.block_size * (ext.activeblks + ext.unexpiredblks) max_free_bytes
      FROM (SELECT SUM(activeblks) activeblks, SUM(unexpiredblks) unexpiredblks
              FROM v$undostat) ext,
           (SELECT value tablespace_name
              FROM v$parameter
             WHERE name = 'undo_tablespace') par,
           (SELECT TO_NUMBER(value) block_size
              FROM v$parameter
             WHERE name = 'db_block_size') blk,
           (SELECT tablespace_name,
                   SUM(GREATEST(bytes, maxbytes)) tbs_max_size,
                   SUM(bytes) tbs_size
              FROM dba_data_files
             GROUP BY tablespace_name) fs
     WHERE par.tablespace_name = fs.tablespace_name";

/// Archive log statistics of the last hour, one row per instance and metric.
pub const ARCHIVELOG_STATS_QUERY: &str = "
    SELECT inst_id, metric, value
      FROM (SELECT TO_CHAR(inst_id) inst_id,
                   MIN(sequence#) min_sequence,
                   MAX(sequence#) max_sequence,
                   COUNT(*) sequences_total,
                   SUM(CASE WHEN archived = 'YES' THEN 1 ELSE 0 END) archived_total,
                   SUM(CASE WHEN applied = 'YES' THEN 1 ELSE 0 END) applied_total,
                   ROUND((MIN(first_time) - DATE '1970-01-01') * 86400) min_first_time,
                   ROUND((MAX(next_time) - DATE '1970-01-01') * 86400) max_next_time,
                   SUM(blocks * block_size) total_size_bytes,
                   ROUND(AVG(blocks * block_size)) avg_size_bytes
              FROM gv$archived_log
             WHERE first_time > SYSDATE - 1/24
             GROUP BY inst_id)
    UNPIVOT (value FOR metric IN (
        min_sequence AS 'min_sequence',
        max_sequence AS 'max_sequence',
        sequences_total AS 'sequences_total',
        archived_total AS 'archived_total',
        applied_total AS 'applied_total',
        min_first_time AS 'min_first_time',
        max_next_time AS 'max_next_time',
        total_size_bytes AS 'total_size_bytes',
        avg_size_bytes AS 'avg_size_bytes'))";

pub const ARCHIVELOG_COMPLETION_QUERY: &str = "
    SELECT TO_CHAR(inst_id) inst_id,
           ROUND(AVG((completion_time - next_time) * 86400000)) completion_avg_time_ms
      FROM (SELECT inst_id, completion_time, next_time
              FROM gv$archived_log
             WHERE first_time > SYSDATE - 0.25
             ORDER BY completion_time DESC
             FETCH FIRST 5 ROWS ONLY)
     GROUP BY inst_id";

pub const RESOURCE_LIMIT_QUERY: &str = "
    SELECT resource_name,
           current_utilization,
           max_utilization,
           TO_NUMBER(initial_allocation) init_limit
      FROM v$resource_limit
     WHERE resource_name IN ('processes', 'sessions', 'max_shared_servers',
                             'max_parallel_servers', 'enqueue_locks')";

fn labels(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

/// Session counts by type and active user sessions.
pub fn sessions() -> ProbeSpec {
    ProbeSpec {
        name: SESSIONS.to_string(),
        keep_partial: false,
        queries: vec![
            QuerySpec {
                sql: SESSION_COUNT_QUERY.to_string(),
                subsystem: "sessions".to_string(),
                single_row: false,
                shape: ShapeSpec::Wide {
                    labels: labels(&["session_type"]),
                    metrics: vec![MetricColumn::gauge(
                        "total",
                        "Number of sessions currently connected.",
                    )],
                },
            },
            QuerySpec {
                sql: ACTIVE_USER_SESSION_QUERY.to_string(),
                subsystem: "sessions".to_string(),
                single_row: true,
                shape: ShapeSpec::Wide {
                    labels: vec![],
                    metrics: vec![MetricColumn::gauge(
                        "active_user_total",
                        "Number of active user sessions.",
                    )],
                },
            },
        ],
    }
}

/// Size and free space of permanent and undo tablespaces.
pub fn tablespaces() -> ProbeSpec {
    ProbeSpec {
        name: TABLESPACES.to_string(),
        keep_partial: false,
        queries: vec![QuerySpec {
            sql: TABLESPACE_USAGE_QUERY.to_string(),
            subsystem: "tablespaces".to_string(),
            single_row: false,
            shape: ShapeSpec::Wide {
                labels: labels(&["tablespace_name"]),
                metrics: vec![
                    MetricColumn::gauge("size_bytes", "Tablespace size in bytes."),
                    MetricColumn::gauge("free_bytes", "Tablespace free space in bytes."),
                    MetricColumn::gauge(
                        "max_size_bytes",
                        "Tablespace maximum size in bytes. This is the autoextend limit; \
                         without autoextend it equals size_bytes.",
                    ),
                    MetricColumn::gauge(
                        "max_free_bytes",
                        "Tablespace maximum free space in bytes, counting autoextend headroom.",
                    ),
                ],
            },
        }],
    }
}

/// Archive log generation of the last hour and archiving latency.
pub fn archivelog() -> ProbeSpec {
    ProbeSpec {
        name: ARCHIVELOG.to_string(),
        keep_partial: false,
        queries: vec![
            QuerySpec {
                sql: ARCHIVELOG_STATS_QUERY.to_string(),
                subsystem: "archivelog_stats".to_string(),
                single_row: false,
                shape: ShapeSpec::Pivoted {
                    labels: labels(&["inst_id"]),
                    help: "Details about archivelogs in the last hour.".to_string(),
                    kind: Default::default(),
                },
            },
            QuerySpec {
                sql: ARCHIVELOG_COMPLETION_QUERY.to_string(),
                subsystem: "archivelog_stats".to_string(),
                single_row: false,
                shape: ShapeSpec::Wide {
                    labels: labels(&["inst_id"]),
                    metrics: vec![MetricColumn::gauge(
                        "completion_avg_time_ms",
                        "Average archive completion time of the last 5 archivelogs.",
                    )],
                },
            },
        ],
    }
}

/// Utilization of selected resource limits, labelled by resource name.
pub fn resource_limit() -> ProbeSpec {
    ProbeSpec {
        name: RESOURCE_LIMIT.to_string(),
        keep_partial: false,
        queries: vec![QuerySpec {
            sql: RESOURCE_LIMIT_QUERY.to_string(),
            subsystem: "resource_limit".to_string(),
            single_row: false,
            shape: ShapeSpec::Wide {
                labels: labels(&["resource_name"]),
                metrics: vec![
                    MetricColumn::gauge(
                        "current_utilization",
                        "Current utilization of a resource limit.",
                    ),
                    MetricColumn::gauge(
                        "max_utilization",
                        "Max utilization of a resource limit since startup.",
                    ),
                    MetricColumn::gauge(
                        "init_limit",
                        "Configured resource limit in pfile or spfile.",
                    ),
                ],
            },
        }],
    }
}

/// Specs of the built-in probes enabled in `collect`.
pub fn enabled_builtins(collect: &CollectConfig) -> Vec<ProbeSpec> {
    [sessions(), tablespaces(), archivelog(), resource_limit()]
        .into_iter()
        .filter(|spec| collect.is_enabled(&spec.name))
        .collect()
}

/// Compile specs into probes, registering their static families.
///
/// A registry conflict here means two probes declare the same family with
/// different labels; the caller treats it as a fatal startup error.
pub fn build_probes(
    specs: &[ProbeSpec],
    registry: &Arc<MetricRegistry>,
) -> Result<Vec<Arc<dyn Probe>>, ProbeError> {
    specs
        .iter()
        .map(|spec| {
            spec.build(registry.clone())
                .map(|probe| Arc::new(probe) as Arc<dyn Probe>)
        })
        .collect()
}

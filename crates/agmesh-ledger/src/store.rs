use crate::{Error, Result};
use agmesh_types::{Message, MessageContent, MessageFilter, TokenUsage, now_ms};
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

// NOTE: Ledger Design Rationale
//
// Why one table, schema-on-write?
// - The message envelope is fixed by the wire contract; only content.data
//   is open-ended, and that rides along as a JSON blob
// - Append order must be total per cluster, so the store owns id and
//   timestamp assignment behind a single serializing surface
// - Every query the runtime needs (filtered scan, last-match, count,
//   usage aggregate) is a single SQL statement, which is what makes each
//   call snapshot-consistent

/// Per-role token and cost aggregate.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RoleUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_cost_usd: f64,
}

/// Result of [`Ledger::token_usage`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TokenUsageReport {
    pub by_role: BTreeMap<String, RoleUsage>,
    pub total: RoleUsage,
}

/// Append-only message log scoped by cluster id.
pub struct Ledger {
    conn: Mutex<Connection>,
}

impl Ledger {
    pub fn open(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        let ledger = Self {
            conn: Mutex::new(conn),
        };
        ledger.init_schema()?;
        Ok(ledger)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let ledger = Self {
            conn: Mutex::new(conn),
        };
        ledger.init_schema()?;
        Ok(ledger)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                cluster_id TEXT NOT NULL,
                topic TEXT NOT NULL,
                sender TEXT NOT NULL,
                receiver TEXT NOT NULL DEFAULT 'broadcast',
                ts_ms INTEGER NOT NULL,
                text TEXT,
                data TEXT,
                sender_model TEXT,
                sender_provider TEXT,
                sender_role TEXT,
                input_tokens INTEGER,
                output_tokens INTEGER,
                total_cost_usd REAL
            );

            CREATE INDEX IF NOT EXISTS idx_messages_cluster_ts ON messages(cluster_id, ts_ms);
            CREATE INDEX IF NOT EXISTS idx_messages_cluster_topic ON messages(cluster_id, topic);
            "#,
        )?;
        Ok(())
    }

    /// Append a message. The input's `id` and `timestamp` are ignored; the
    /// store assigns both, keeping timestamps non-decreasing per cluster.
    pub fn append(&self, msg: Message) -> Result<Message> {
        if msg.cluster_id.is_empty() || msg.topic.is_empty() || msg.sender.is_empty() {
            return Err(Error::InvalidOperation(
                "message requires cluster_id, topic and sender".to_string(),
            ));
        }

        let conn = self.conn.lock().unwrap();
        let last_ts: Option<i64> = conn
            .query_row(
                "SELECT MAX(ts_ms) FROM messages WHERE cluster_id = ?1",
                params![&msg.cluster_id],
                |row| row.get(0),
            )
            .optional()?
            .flatten();
        let ts = now_ms().max(last_ts.unwrap_or(i64::MIN));

        let data = msg
            .content
            .data
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        conn.execute(
            r#"
            INSERT INTO messages (
                cluster_id, topic, sender, receiver, ts_ms, text, data,
                sender_model, sender_provider, sender_role,
                input_tokens, output_tokens, total_cost_usd
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
            params![
                &msg.cluster_id,
                &msg.topic,
                &msg.sender,
                &msg.receiver,
                ts,
                &msg.content.text,
                &data,
                &msg.sender_model,
                &msg.sender_provider,
                &msg.sender_role,
                msg.usage.map(|u| u.input_tokens as i64),
                msg.usage.map(|u| u.output_tokens as i64),
                msg.usage.map(|u| u.total_cost_usd),
            ],
        )?;

        let id = conn.last_insert_rowid();
        Ok(Message {
            id,
            timestamp: ts,
            ..msg
        })
    }

    /// Filtered scan, ascending by timestamp. With `limit`, the newest N
    /// matches are kept and returned in ascending order.
    pub fn query(&self, filter: &MessageFilter) -> Result<Vec<Message>> {
        let (where_sql, args) = build_where(filter);
        let conn = self.conn.lock().unwrap();

        let mut messages = if let Some(limit) = filter.limit {
            let sql = format!(
                "SELECT {COLUMNS} FROM messages WHERE {where_sql} \
                 ORDER BY ts_ms DESC, id DESC LIMIT {limit}"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(args), row_to_message)?;
            let mut out = rows.collect::<std::result::Result<Vec<_>, _>>()?;
            out.reverse();
            out
        } else {
            let sql = format!(
                "SELECT {COLUMNS} FROM messages WHERE {where_sql} ORDER BY ts_ms ASC, id ASC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(args), row_to_message)?;
            rows.collect::<std::result::Result<Vec<_>, _>>()?
        };

        for msg in &mut messages {
            decode_data(msg)?;
        }
        Ok(messages)
    }

    /// Highest-timestamp match, or `None`.
    pub fn find_last(&self, filter: &MessageFilter) -> Result<Option<Message>> {
        let (where_sql, args) = build_where(filter);
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT {COLUMNS} FROM messages WHERE {where_sql} ORDER BY ts_ms DESC, id DESC LIMIT 1"
        );
        let mut stmt = conn.prepare(&sql)?;
        let msg = stmt
            .query_row(params_from_iter(args), row_to_message)
            .optional()?;
        match msg {
            Some(mut msg) => {
                decode_data(&mut msg)?;
                Ok(Some(msg))
            }
            None => Ok(None),
        }
    }

    pub fn count(&self, filter: &MessageFilter) -> Result<u64> {
        let (where_sql, args) = build_where(filter);
        let conn = self.conn.lock().unwrap();
        let sql = format!("SELECT COUNT(*) FROM messages WHERE {where_sql}");
        let n: i64 = conn.query_row(&sql, params_from_iter(args), |row| row.get(0))?;
        Ok(n as u64)
    }

    /// Aggregate token usage per sender role plus a cluster-wide total.
    pub fn token_usage(&self, cluster_id: &str) -> Result<TokenUsageReport> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"
            SELECT sender_role,
                   COALESCE(SUM(input_tokens), 0),
                   COALESCE(SUM(output_tokens), 0),
                   COALESCE(SUM(total_cost_usd), 0.0)
            FROM messages
            WHERE cluster_id = ?1 AND input_tokens IS NOT NULL
            GROUP BY sender_role
            "#,
        )?;

        let mut report = TokenUsageReport::default();
        let rows = stmt.query_map(params![cluster_id], |row| {
            Ok((
                row.get::<_, Option<String>>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, f64>(3)?,
            ))
        })?;

        for row in rows {
            let (role, input, output, cost) = row?;
            let usage = RoleUsage {
                input_tokens: input as u64,
                output_tokens: output as u64,
                total_cost_usd: cost,
            };
            report.total.input_tokens += usage.input_tokens;
            report.total.output_tokens += usage.output_tokens;
            report.total.total_cost_usd += usage.total_cost_usd;
            report
                .by_role
                .insert(role.unwrap_or_else(|| "unknown".to_string()), usage);
        }
        Ok(report)
    }
}

const COLUMNS: &str = "id, cluster_id, topic, sender, receiver, ts_ms, text, data, \
                       sender_model, sender_provider, sender_role, \
                       input_tokens, output_tokens, total_cost_usd";

fn build_where(filter: &MessageFilter) -> (String, Vec<rusqlite::types::Value>) {
    use rusqlite::types::Value;

    let mut clauses = vec!["cluster_id = ?".to_string()];
    let mut args = vec![Value::Text(filter.cluster_id.clone())];

    if let Some(topic) = &filter.topic {
        clauses.push("topic = ?".to_string());
        args.push(Value::Text(topic.clone()));
    }
    if let Some(sender) = &filter.sender {
        clauses.push("sender = ?".to_string());
        args.push(Value::Text(sender.clone()));
    }
    if let Some(since) = filter.since {
        clauses.push("ts_ms >= ?".to_string());
        args.push(Value::Integer(since));
    }
    if let Some(until) = filter.until {
        clauses.push("ts_ms <= ?".to_string());
        args.push(Value::Integer(until));
    }

    (clauses.join(" AND "), args)
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let input_tokens: Option<i64> = row.get(11)?;
    let output_tokens: Option<i64> = row.get(12)?;
    let total_cost_usd: Option<f64> = row.get(13)?;
    let usage = input_tokens.map(|input| TokenUsage {
        input_tokens: input as u64,
        output_tokens: output_tokens.unwrap_or(0) as u64,
        total_cost_usd: total_cost_usd.unwrap_or(0.0),
    });

    Ok(Message {
        id: row.get(0)?,
        cluster_id: row.get(1)?,
        topic: row.get(2)?,
        sender: row.get(3)?,
        receiver: row.get(4)?,
        timestamp: row.get(5)?,
        content: MessageContent {
            text: row.get(6)?,
            // Raw JSON string; decoded after the row is materialized so the
            // rusqlite error type does not have to carry serde errors.
            data: row
                .get::<_, Option<String>>(7)?
                .map(serde_json::Value::String),
        },
        sender_model: row.get(8)?,
        sender_provider: row.get(9)?,
        sender_role: row.get(10)?,
        usage,
    })
}

fn decode_data(msg: &mut Message) -> Result<()> {
    if let Some(serde_json::Value::String(raw)) = msg.content.data.take() {
        msg.content.data = Some(serde_json::from_str(&raw)?);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use agmesh_types::message::BROADCAST;
    use serde_json::json;

    fn draft(cluster: &str, topic: &str, sender: &str) -> Message {
        Message {
            id: 0,
            timestamp: 0,
            cluster_id: cluster.to_string(),
            topic: topic.to_string(),
            sender: sender.to_string(),
            receiver: BROADCAST.to_string(),
            content: MessageContent::default(),
            sender_model: None,
            sender_provider: None,
            sender_role: None,
            usage: None,
        }
    }

    #[test]
    fn test_append_assigns_increasing_ids() {
        let ledger = Ledger::open_in_memory().unwrap();
        let a = ledger.append(draft("c1", "A", "system")).unwrap();
        let b = ledger.append(draft("c1", "B", "system")).unwrap();
        assert!(b.id > a.id);
        assert!(b.timestamp >= a.timestamp);
    }

    #[test]
    fn test_append_rejects_missing_fields() {
        let ledger = Ledger::open_in_memory().unwrap();
        let mut msg = draft("c1", "A", "system");
        msg.topic = String::new();
        assert!(ledger.append(msg).is_err());
    }

    #[test]
    fn test_query_filters_and_orders() {
        let ledger = Ledger::open_in_memory().unwrap();
        ledger.append(draft("c1", "A", "x")).unwrap();
        ledger.append(draft("c1", "B", "y")).unwrap();
        ledger.append(draft("c2", "A", "x")).unwrap();

        let all = ledger.query(&MessageFilter::cluster("c1")).unwrap();
        assert_eq!(all.len(), 2);
        assert!(all[0].id < all[1].id);

        let a_only = ledger
            .query(&MessageFilter::cluster("c1").topic("A"))
            .unwrap();
        assert_eq!(a_only.len(), 1);
        assert_eq!(a_only[0].sender, "x");
    }

    #[test]
    fn test_query_limit_keeps_newest_ascending() {
        let ledger = Ledger::open_in_memory().unwrap();
        for i in 0..5 {
            ledger.append(draft("c1", &format!("T{}", i), "s")).unwrap();
        }
        let latest = ledger
            .query(&MessageFilter::cluster("c1").limit(2))
            .unwrap();
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0].topic, "T3");
        assert_eq!(latest[1].topic, "T4");
    }

    #[test]
    fn test_find_last_and_count() {
        let ledger = Ledger::open_in_memory().unwrap();
        assert!(
            ledger
                .find_last(&MessageFilter::cluster("c1"))
                .unwrap()
                .is_none()
        );
        ledger.append(draft("c1", "A", "x")).unwrap();
        ledger.append(draft("c1", "A", "y")).unwrap();

        let last = ledger
            .find_last(&MessageFilter::cluster("c1").topic("A"))
            .unwrap()
            .unwrap();
        assert_eq!(last.sender, "y");
        assert_eq!(ledger.count(&MessageFilter::cluster("c1")).unwrap(), 2);
    }

    #[test]
    fn test_content_data_round_trips() {
        let ledger = Ledger::open_in_memory().unwrap();
        let mut msg = draft("c1", "VALIDATION_RESULT", "validator-1");
        msg.content = MessageContent::data(json!({ "approved": true, "criteria": [1, 2] }));
        ledger.append(msg).unwrap();

        let got = ledger
            .find_last(&MessageFilter::cluster("c1"))
            .unwrap()
            .unwrap();
        assert_eq!(got.content.data, Some(json!({ "approved": true, "criteria": [1, 2] })));
    }

    #[test]
    fn test_token_usage_aggregates_by_role() {
        let ledger = Ledger::open_in_memory().unwrap();
        let mut a = draft("c1", "TASK_LOG", "w1");
        a.sender_role = Some("implementation".to_string());
        a.usage = Some(TokenUsage {
            input_tokens: 100,
            output_tokens: 10,
            total_cost_usd: 0.5,
        });
        ledger.append(a).unwrap();

        let mut b = draft("c1", "TASK_LOG", "v1");
        b.sender_role = Some("validator".to_string());
        b.usage = Some(TokenUsage {
            input_tokens: 50,
            output_tokens: 5,
            total_cost_usd: 0.25,
        });
        ledger.append(b).unwrap();
        // No usage attached: excluded from aggregation.
        ledger.append(draft("c1", "TASK_LOG", "w1")).unwrap();

        let report = ledger.token_usage("c1").unwrap();
        assert_eq!(report.total.input_tokens, 150);
        assert_eq!(report.total.output_tokens, 15);
        assert!((report.total.total_cost_usd - 0.75).abs() < 1e-9);
        assert_eq!(report.by_role["implementation"].input_tokens, 100);
        assert_eq!(report.by_role["validator"].input_tokens, 50);
    }

    #[test]
    fn test_open_on_disk() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("ledger.db");
        {
            let ledger = Ledger::open(&path).unwrap();
            ledger.append(draft("c1", "A", "system")).unwrap();
        }
        let reopened = Ledger::open(&path).unwrap();
        assert_eq!(reopened.count(&MessageFilter::cluster("c1")).unwrap(), 1);
    }
}

//! MySQL channel over a single `mysql_async` connection.

use async_trait::async_trait;
use chrono::{Datelike, Timelike};
use mysql_async::prelude::*;
use mysql_async::{Conn, Opts, OptsBuilder, SslOpts};
use tracing::{debug, info, warn};

use super::SqlChannel;
use crate::config::TargetConfig;
use crate::core::identifier::quote_mysql;
use crate::core::value::SqlValue;
use crate::error::{MigrateError, Result};

/// [`SqlChannel`] backed by one MySQL connection.
pub struct MysqlChannel {
    config: TargetConfig,
    conn: Option<Conn>,
}

impl MysqlChannel {
    /// Create an unconnected channel for `config`.
    pub fn new(config: &TargetConfig) -> Self {
        Self {
            config: config.clone(),
            conn: None,
        }
    }

    fn opts(&self) -> Opts {
        let ssl_opts = match self.config.ssl_mode.to_lowercase().as_str() {
            "disable" => {
                warn!("MySQL TLS is disabled. Credentials will be transmitted in plaintext.");
                None
            }
            "prefer" | "require" => Some(SslOpts::default().with_danger_accept_invalid_certs(true)),
            "verify-ca" | "verify_ca" | "verify-full" | "verify_identity" => {
                Some(SslOpts::default())
            }
            other => {
                warn!("Unknown ssl_mode '{}', defaulting to prefer", other);
                Some(SslOpts::default().with_danger_accept_invalid_certs(true))
            }
        };

        // No default database: it may not exist yet.
        let mut builder = OptsBuilder::default()
            .ip_or_hostname(self.config.host.clone())
            .tcp_port(self.config.port)
            .user(Some(self.config.user.clone()))
            .pass(Some(self.config.password.clone()))
            .init(vec!["SET NAMES utf8mb4"]);

        if let Some(ssl) = ssl_opts {
            builder = builder.ssl_opts(ssl);
        }
        builder.into()
    }

    fn conn(&mut self) -> Result<&mut Conn> {
        self.conn
            .as_mut()
            .ok_or_else(|| MigrateError::Connection("MySQL channel is not connected".into()))
    }
}

#[async_trait]
impl SqlChannel for MysqlChannel {
    async fn connect(&mut self) -> Result<()> {
        let conn = Conn::new(self.opts()).await.map_err(classify)?;
        info!(
            "Connected to MySQL destination: {}:{}",
            self.config.host, self.config.port
        );
        self.conn = Some(conn);
        Ok(())
    }

    async fn use_database(&mut self, name: &str) -> Result<()> {
        let sql = format!("USE {}", quote_mysql(name)?);
        self.conn()?.query_drop(sql).await.map_err(classify)
    }

    async fn execute_ddl(&mut self, sql: &str) -> Result<()> {
        debug!("MySQL DDL: {}", sql);
        self.conn()?.query_drop(sql).await.map_err(classify)
    }

    async fn begin(&mut self) -> Result<()> {
        self.conn()?
            .query_drop("START TRANSACTION")
            .await
            .map_err(classify)
    }

    async fn commit(&mut self) -> Result<()> {
        self.conn()?.query_drop("COMMIT").await.map_err(classify)
    }

    async fn rollback(&mut self) -> Result<()> {
        self.conn()?.query_drop("ROLLBACK").await.map_err(classify)
    }

    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64> {
        let values: Vec<mysql_async::Value> = params.iter().map(sql_value_to_mysql).collect();
        let conn = self.conn()?;
        conn.exec_drop(sql, values).await.map_err(classify)?;
        Ok(conn.affected_rows())
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(conn) = self.conn.take() {
            conn.disconnect().await.map_err(classify)?;
        }
        Ok(())
    }

    fn db_type(&self) -> &str {
        "mysql"
    }
}

/// Split driver errors into statement problems and lost connectivity.
fn classify(err: mysql_async::Error) -> MigrateError {
    match err {
        mysql_async::Error::Server(e) => {
            MigrateError::Statement(format!("{} ({}): {}", e.code, e.state, e.message))
        }
        mysql_async::Error::Driver(e) => MigrateError::Statement(e.to_string()),
        other => MigrateError::Connection(other.to_string()),
    }
}

fn sql_value_to_mysql(value: &SqlValue) -> mysql_async::Value {
    use mysql_async::Value;
    match value {
        SqlValue::Null => Value::NULL,
        SqlValue::Bool(b) => Value::from(*b),
        SqlValue::Int(i) => Value::from(*i),
        SqlValue::Float(f) => Value::from(*f),
        SqlValue::Text(s) => Value::from(s.as_str()),
        SqlValue::Bytes(b) => Value::from(b.as_slice()),
        SqlValue::Decimal(d) => Value::from(d.to_string()),
        SqlValue::Date(d) => Value::Date(d.year() as u16, d.month() as u8, d.day() as u8, 0, 0, 0, 0),
        SqlValue::Timestamp(dt) => Value::Date(
            dt.year() as u16,
            dt.month() as u8,
            dt.day() as u8,
            dt.hour() as u8,
            dt.minute() as u8,
            dt.second() as u8,
            dt.nanosecond() / 1_000,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_sql_value_to_mysql_dates() {
        let d = NaiveDate::from_ymd_opt(2001, 2, 3).unwrap();
        assert_eq!(
            sql_value_to_mysql(&SqlValue::Date(d)),
            mysql_async::Value::Date(2001, 2, 3, 0, 0, 0, 0)
        );
        let dt = d.and_hms_micro_opt(4, 5, 6, 7).unwrap();
        assert_eq!(
            sql_value_to_mysql(&SqlValue::Timestamp(dt)),
            mysql_async::Value::Date(2001, 2, 3, 4, 5, 6, 7)
        );
    }

    #[test]
    fn test_sql_value_to_mysql_scalars() {
        assert_eq!(sql_value_to_mysql(&SqlValue::Null), mysql_async::Value::NULL);
        assert_eq!(
            sql_value_to_mysql(&SqlValue::Int(5)),
            mysql_async::Value::Int(5)
        );
        assert_eq!(
            sql_value_to_mysql(&SqlValue::Decimal(rust_decimal::Decimal::new(1234, 2))),
            mysql_async::Value::Bytes(b"12.34".to_vec())
        );
    }

    #[test]
    fn test_unconnected_channel_reports_connectivity() {
        let config = TargetConfig {
            host: "localhost".into(),
            port: 3306,
            database: "db".into(),
            user: "root".into(),
            password: String::new(),
            ssl_mode: "disable".into(),
        };
        let mut channel = MysqlChannel::new(&config);
        assert!(channel.conn().unwrap_err().is_connectivity());
    }
}

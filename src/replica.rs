//! Replica connection descriptors.

use anyhow::Context;
use tokio_postgres::{Client, NoTls};

/// One database endpoint in the cluster. Immutable after load; the live
/// connection it describes is owned exclusively by whoever called
/// [`Replica::connect`] and is closed exactly once on drop.
#[derive(Debug, Clone)]
pub struct Replica {
    pub id: String,
    pub hostname: String,
    pub port: u16,
    pub dbname: String,
    pub user: String,
    pub password: String,
}

impl Replica {
    /// Build the key=value connection string for this replica.
    pub fn connection_string(&self) -> String {
        format!(
            "host={} port={} dbname={} user={} password={}",
            self.hostname, self.port, self.dbname, self.user, self.password
        )
    }

    /// Open a connection to this replica, spawning the connection driver
    /// onto the runtime. Connection failures are fatal; there is no retry.
    pub async fn connect(&self) -> anyhow::Result<Client> {
        let (client, connection) = tokio_postgres::connect(&self.connection_string(), NoTls)
            .await
            .with_context(|| {
                format!(
                    "Failed to connect to replica {} at {}:{}",
                    self.id, self.hostname, self.port
                )
            })?;

        let id = self.id.clone();
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!("Connection error on replica {id}: {e}");
            }
        });

        Ok(client)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_string_fields_in_order() {
        let replica = Replica {
            id: "0".to_string(),
            hostname: "10.0.0.1".to_string(),
            port: 5432,
            dbname: "tpchdb".to_string(),
            user: "bench".to_string(),
            password: "secret".to_string(),
        };

        assert_eq!(
            replica.connection_string(),
            "host=10.0.0.1 port=5432 dbname=tpchdb user=bench password=secret"
        );
    }
}

//! Network policies and the range-matching rules the kernel applies to them.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use super::{narrow, Store, StoreError};

/// Inclusive range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span<T> {
    /// Lower bound, inclusive.
    pub begin: T,
    /// Upper bound, inclusive.
    pub end: T,
}

impl<T: PartialOrd> Span<T> {
    /// Whether `value` lies within the range.
    pub fn contains(&self, value: &T) -> bool {
        &self.begin <= value && value <= &self.end
    }
}

impl Span<String> {
    fn contains_addr(&self, addr: IpAddr) -> bool {
        let (Ok(begin), Ok(end)) = (self.begin.parse::<IpAddr>(), self.end.parse::<IpAddr>()) else {
            return false;
        };
        match (begin, end, addr) {
            (IpAddr::V4(b), IpAddr::V4(e), IpAddr::V4(a)) => b <= a && a <= e,
            (IpAddr::V6(b), IpAddr::V6(e), IpAddr::V6(a)) => b <= a && a <= e,
            _ => false,
        }
    }
}

/// Source and destination ranges of one field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoints<T> {
    /// Source range.
    pub src: Span<T>,
    /// Destination range.
    pub dst: Span<T>,
}

/// A network policy, in the exact shape `user::net::insert` expects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetPolicy {
    /// Row id; also the kernel-side policy id.
    #[serde(default)]
    pub id: i64,
    /// Higher wins.
    pub priority: i8,
    /// Address ranges, as textual IPs.
    pub addr: Endpoints<String>,
    /// IP protocol number range.
    pub protocol: Span<u8>,
    /// Port ranges.
    pub port: Endpoints<u16>,
    /// Kernel flag bits.
    pub flags: i32,
    /// Kernel verdict on match.
    pub response: u32,
}

/// A packet summary to evaluate policies against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Packet {
    /// Source address.
    pub src: IpAddr,
    /// Destination address.
    pub dst: IpAddr,
    /// IP protocol number.
    pub protocol: u8,
    /// Source port.
    pub src_port: u16,
    /// Destination port.
    pub dst_port: u16,
}

impl NetPolicy {
    /// Whether every field of `packet` falls within this policy's ranges.
    pub fn matches(&self, packet: &Packet) -> bool {
        self.addr.src.contains_addr(packet.src)
            && self.addr.dst.contains_addr(packet.dst)
            && self.protocol.contains(&packet.protocol)
            && self.port.src.contains(&packet.src_port)
            && self.port.dst.contains(&packet.dst_port)
    }
}

/// The policy that applies to `packet`: highest priority, then lowest id.
pub fn select_policy<'a>(policies: &'a [NetPolicy], packet: &Packet) -> Option<&'a NetPolicy> {
    policies
        .iter()
        .filter(|policy| policy.matches(packet))
        .min_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)))
}

type NetRow = (
    i64,
    i64,
    String,
    String,
    String,
    String,
    i64,
    i64,
    i64,
    i64,
    i64,
    i64,
    i64,
    i64,
);

fn policy_from_row(row: NetRow) -> Result<NetPolicy, StoreError> {
    let (
        id,
        priority,
        addr_src_begin,
        addr_src_end,
        addr_dst_begin,
        addr_dst_end,
        protocol_begin,
        protocol_end,
        port_src_begin,
        port_src_end,
        port_dst_begin,
        port_dst_end,
        flags,
        response,
    ) = row;
    Ok(NetPolicy {
        id,
        priority: narrow("net_policy.priority", priority)?,
        addr: Endpoints {
            src: Span {
                begin: addr_src_begin,
                end: addr_src_end,
            },
            dst: Span {
                begin: addr_dst_begin,
                end: addr_dst_end,
            },
        },
        protocol: Span {
            begin: narrow("net_policy.protocol_begin", protocol_begin)?,
            end: narrow("net_policy.protocol_end", protocol_end)?,
        },
        port: Endpoints {
            src: Span {
                begin: narrow("net_policy.port_src_begin", port_src_begin)?,
                end: narrow("net_policy.port_src_end", port_src_end)?,
            },
            dst: Span {
                begin: narrow("net_policy.port_dst_begin", port_dst_begin)?,
                end: narrow("net_policy.port_dst_end", port_dst_end)?,
            },
        },
        flags: narrow("net_policy.flags", flags)?,
        response: narrow("net_policy.response", response)?,
    })
}

const NET_COLUMNS: &str = "id, priority, addr_src_begin, addr_src_end, addr_dst_begin, addr_dst_end,
     protocol_begin, protocol_end, port_src_begin, port_src_end, port_dst_begin, port_dst_end,
     flags, response";

impl Store {
    /// Insert a policy, ignoring `policy.id`, and return the assigned id.
    ///
    /// # Errors
    ///
    /// Returns a database error.
    pub async fn insert_net_policy(&self, policy: &NetPolicy) -> Result<i64, StoreError> {
        let result = sqlx::query(
            "INSERT INTO net_policy (priority, addr_src_begin, addr_src_end, addr_dst_begin,
                 addr_dst_end, protocol_begin, protocol_end, port_src_begin, port_src_end,
                 port_dst_begin, port_dst_end, flags, response)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        )
        .bind(i64::from(policy.priority))
        .bind(&policy.addr.src.begin)
        .bind(&policy.addr.src.end)
        .bind(&policy.addr.dst.begin)
        .bind(&policy.addr.dst.end)
        .bind(i64::from(policy.protocol.begin))
        .bind(i64::from(policy.protocol.end))
        .bind(i64::from(policy.port.src.begin))
        .bind(i64::from(policy.port.src.end))
        .bind(i64::from(policy.port.dst.begin))
        .bind(i64::from(policy.port.dst.end))
        .bind(i64::from(policy.flags))
        .bind(i64::from(policy.response))
        .execute(self.pool())
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Delete one policy.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for an unknown id.
    pub async fn delete_net_policy(&self, id: i64) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM net_policy WHERE id = ?1")
            .bind(id)
            .execute(self.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "net policy",
                id,
            });
        }
        Ok(())
    }

    /// Fetch one policy.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for an unknown id.
    pub async fn net_policy(&self, id: i64) -> Result<NetPolicy, StoreError> {
        let row: Option<NetRow> =
            sqlx::query_as(&format!("SELECT {NET_COLUMNS} FROM net_policy WHERE id = ?1"))
                .bind(id)
                .fetch_optional(self.pool())
                .await?;
        match row {
            Some(row) => policy_from_row(row),
            None => Err(StoreError::NotFound {
                entity: "net policy",
                id,
            }),
        }
    }

    /// One page of policies in evaluation order.
    ///
    /// # Errors
    ///
    /// Returns a database error or [`StoreError::Corrupt`].
    pub async fn list_net_policies(
        &self,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<NetPolicy>, StoreError> {
        let rows: Vec<NetRow> = sqlx::query_as(&format!(
            "SELECT {NET_COLUMNS} FROM net_policy
             ORDER BY priority DESC, id ASC LIMIT ?1 OFFSET ?2"
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool())
        .await?;
        rows.into_iter().map(policy_from_row).collect()
    }

    /// Every policy in evaluation order, for the startup push.
    ///
    /// # Errors
    ///
    /// Returns a database error or [`StoreError::Corrupt`].
    pub async fn all_net_policies(&self) -> Result<Vec<NetPolicy>, StoreError> {
        let rows: Vec<NetRow> = sqlx::query_as(&format!(
            "SELECT {NET_COLUMNS} FROM net_policy ORDER BY priority DESC, id ASC"
        ))
        .fetch_all(self.pool())
        .await?;
        rows.into_iter().map(policy_from_row).collect()
    }
}

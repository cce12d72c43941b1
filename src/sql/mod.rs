//! SQL emission helpers shared by both feature learners.
//!
//! Join lineage is carried as a typed [`JoinPath`] value and rendered by
//! this module - never as a mangled string protocol. The emitted SQL is
//! portable ANSI: identifiers are double-quoted, string literals
//! single-quoted with doubling, and time stamps are plain epoch-second
//! columns.

use crate::containers::join_graph::GraphEdge;

/// A typed description of one join between the population table (`t1`) and
/// a peripheral table (`t2`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinPath {
    pub population: String,
    pub peripheral: String,
    pub keys: Vec<(String, String)>,
    pub time_stamps: Option<(String, String)>,
    pub upper_time_stamp: Option<String>,
}

impl JoinPath {
    pub fn from_edge(population: &str, peripheral: &str, edge: &GraphEdge) -> Self {
        JoinPath {
            population: population.to_string(),
            peripheral: peripheral.to_string(),
            keys: edge.keys.clone(),
            time_stamps: edge.time_stamps.clone(),
            upper_time_stamp: edge.upper_time_stamp.clone(),
        }
    }

    /// The `FROM ... LEFT JOIN ... ON ...` clause, with the time predicates
    /// folded into the join condition.
    pub fn render(&self, use_timestamps: bool) -> String {
        let mut on: Vec<String> = self
            .keys
            .iter()
            .map(|(pop, per)| format!("{} = {}", quote("t1", pop), quote("t2", per)))
            .collect();

        if use_timestamps {
            if let Some((pop_ts, per_ts)) = &self.time_stamps {
                on.push(format!("{} <= {}", quote("t2", per_ts), quote("t1", pop_ts)));
                if let Some(upper) = &self.upper_time_stamp {
                    on.push(format!(
                        "( {upper_col} IS NULL OR {upper_col} > {pop_col} )",
                        upper_col = quote("t2", upper),
                        pop_col = quote("t1", pop_ts),
                    ));
                }
            }
        }

        format!(
            "FROM {} t1\nLEFT JOIN {} t2\nON {}",
            quote_table(&self.population),
            quote_table(&self.peripheral),
            on.join("\nAND ")
        )
    }
}

/// `alias."name"` with embedded quotes doubled.
pub fn quote(alias: &str, name: &str) -> String {
    format!("{alias}.\"{}\"", name.replace('"', "\"\""))
}

/// `"NAME"` with embedded quotes doubled.
pub fn quote_table(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// A single-quoted string literal with embedded quotes doubled.
pub fn string_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Formats a float literal so that integral values read as integers.
pub fn float_literal(value: f64) -> String {
    if value == value.trunc() && value.abs() < 1e15 {
        format!("{value:.1}")
    } else {
        format!("{value}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edge() -> GraphEdge {
        GraphEdge {
            parent: 0,
            child: 1,
            keys: vec![("id".to_string(), "customer_id".to_string())],
            time_stamps: Some(("ts".to_string(), "ts".to_string())),
            upper_time_stamp: Some("valid_until".to_string()),
        }
    }

    #[test]
    fn test_render_join_with_time_predicates() {
        let path = JoinPath::from_edge("POPULATION", "ORDERS", &edge());
        let sql = path.render(true);
        assert!(sql.contains("FROM \"POPULATION\" t1"));
        assert!(sql.contains("LEFT JOIN \"ORDERS\" t2"));
        assert!(sql.contains("t1.\"id\" = t2.\"customer_id\""));
        assert!(sql.contains("t2.\"ts\" <= t1.\"ts\""));
        assert!(sql.contains("t2.\"valid_until\" IS NULL OR t2.\"valid_until\" > t1.\"ts\""));
    }

    #[test]
    fn test_render_without_timestamps() {
        let path = JoinPath::from_edge("POPULATION", "ORDERS", &edge());
        let sql = path.render(false);
        assert!(!sql.contains("<="));
    }

    #[test]
    fn test_literals() {
        assert_eq!(string_literal("it's"), "'it''s'");
        assert_eq!(float_literal(3.0), "3.0");
        assert_eq!(float_literal(3.25), "3.25");
    }
}

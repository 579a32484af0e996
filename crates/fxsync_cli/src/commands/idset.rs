//! IDSET command implementation.

use super::parse_hex;
use fxsync_core::IdSet;
use serde::Serialize;

/// Ranges of one replica.
#[derive(Debug, PartialEq, Eq, Serialize)]
pub struct ReplicaRanges {
    /// Replica GUID.
    pub replica: String,
    /// Inclusive `(low, high)` counter ranges.
    pub ranges: Vec<(u64, u64)>,
}

/// Decoded IDSET.
#[derive(Debug, PartialEq, Eq, Serialize)]
pub struct IdSetReport {
    /// Encoded size in bytes.
    pub bytes: usize,
    /// Total number of counters.
    pub counters: u64,
    /// Per-replica ranges, in encoding order.
    pub replicas: Vec<ReplicaRanges>,
}

/// Runs the idset command.
pub fn run(hex: &str, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let report = inspect(&parse_hex(hex)?)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        _ => {
            println!("IDSET: {} bytes, {} counters", report.bytes, report.counters);
            for replica in &report.replicas {
                println!("  {}", replica.replica);
                for (low, high) in &replica.ranges {
                    if low == high {
                        println!("    {:#x}", low);
                    } else {
                        println!("    {:#x}..={:#x}", low, high);
                    }
                }
            }
        }
    }

    Ok(())
}

/// Decodes an IDSET into a report.
pub fn inspect(bytes: &[u8]) -> Result<IdSetReport, Box<dyn std::error::Error>> {
    let set = IdSet::decode(bytes)?;
    let replicas = set
        .replicas()
        .map(|replica| ReplicaRanges {
            replica: replica.to_string(),
            ranges: set
                .ranges(replica)
                .iter()
                .map(|range| (range.low().value(), range.high().value()))
                .collect(),
        })
        .collect();
    Ok(IdSetReport {
        bytes: bytes.len(),
        counters: set.counter_count(),
        replicas,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_ranges() {
        let hex = "01010101010101010101010101010101 05 0000000000 520105 50 00";
        let report = inspect(&parse_hex(hex).unwrap()).unwrap();
        assert_eq!(report.counters, 5);
        assert_eq!(report.replicas.len(), 1);
        assert_eq!(report.replicas[0].ranges, vec![(1, 5)]);
    }

    #[test]
    fn truncated_set_is_an_error() {
        assert!(inspect(&parse_hex("0101010101010101010101010101010106").unwrap()).is_err());
    }
}

//! PCL compare command implementation.

use super::parse_hex;
use fxsync_core::{ConflictVerdict, PredecessorChangeList};
use serde::Serialize;

/// Result of comparing two change lists.
#[derive(Debug, PartialEq, Eq, Serialize)]
pub struct Comparison {
    /// `a-includes-b`, `b-includes-a`, `equal` or `concurrent`.
    pub verdict: String,
    /// Entries of the first list as `replica:counter`.
    pub a: Vec<String>,
    /// Entries of the second list as `replica:counter`.
    pub b: Vec<String>,
}

/// Runs the pcl-compare command.
pub fn run(a: &str, b: &str, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let comparison = compare(&parse_hex(a)?, &parse_hex(b)?)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&comparison)?);
        }
        _ => {
            println!("A: {}", comparison.a.join(", "));
            println!("B: {}", comparison.b.join(", "));
            println!("Verdict: {}", comparison.verdict);
        }
    }

    Ok(())
}

/// Decodes both lists and classifies them.
pub fn compare(a: &[u8], b: &[u8]) -> Result<Comparison, Box<dyn std::error::Error>> {
    let a = PredecessorChangeList::decode(a)?;
    let b = PredecessorChangeList::decode(b)?;
    let verdict: ConflictVerdict = a.compare(&b);
    Ok(Comparison {
        verdict: verdict.to_string(),
        a: entries(&a),
        b: entries(&b),
    })
}

fn entries(pcl: &PredecessorChangeList) -> Vec<String> {
    pcl.entries()
        .iter()
        .map(|xid| format!("{}:{}", xid.replica, xid.counter))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const R1: &str = "01010101010101010101010101010101";
    const R2: &str = "02020202020202020202020202020202";

    fn pcl(replica: &str, counter: &str) -> Vec<u8> {
        parse_hex(&format!("170016{replica}{counter}")).unwrap()
    }

    #[test]
    fn newer_counter_includes_older() {
        let result = compare(&pcl(R1, "000000000005"), &pcl(R1, "000000000003")).unwrap();
        assert_eq!(result.verdict, "a-includes-b");
        assert_eq!(result.a.len(), 1);
    }

    #[test]
    fn disjoint_replicas_are_concurrent() {
        let result = compare(&pcl(R1, "000000000005"), &pcl(R2, "000000000001")).unwrap();
        assert_eq!(result.verdict, "concurrent");
    }

    #[test]
    fn length_prefix_must_cover_the_entries() {
        let mut bytes = pcl(R1, "000000000001");
        bytes[0] = 0x16;
        assert!(compare(&bytes, &pcl(R1, "000000000001")).is_err());
    }

    #[test]
    fn malformed_list_is_an_error() {
        assert!(compare(&[0x02, 0x00, 0x16, 0x01], &pcl(R1, "000000000001")).is_err());
    }
}

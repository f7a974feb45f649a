// Part of cia402-rs. Copyright 2018-2019 by the authors.
// This work is dual-licensed under Apache 2.0 and MIT terms.

//! Per-node SDO configuration tables, read from CSV text.
//!
//! Every line holds one object dictionary entry plus one value column
//! per node: `index,subindex,value-node-0,value-node-1,...`. A `#`
//! starts a comment, whitespace is insignificant and numbers may be
//! decimal or 0x-prefixed hex.

use derive_new::new;
use std::fs;
use std::path::Path;

use crate::types::{Error, Result};

/// One object dictionary entry to download to a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, new)]
pub struct SdoParam {
    pub index: u16,
    pub subindex: u8,
    pub value: u32,
    /// Download size in bytes. The table format carries no size
    /// column, so all values are transferred as 32 bit.
    #[new(value = "4")]
    pub bytecount: usize,
}

/// A parsed configuration table: the same parameter list for every
/// node, with per-node values.
#[derive(Debug, Clone)]
pub struct SdoConfig {
    // [node][param]
    params: Vec<Vec<SdoParam>>,
}

impl SdoConfig {
    /// Read and parse a table file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::parse(&fs::read_to_string(path)?)
    }

    /// Parse a table from text.
    ///
    /// All rows must carry the same number of fields, and at least one
    /// row with at least one value column must be present.
    pub fn parse(text: &str) -> Result<Self> {
        let mut columns = 0;
        let mut rows: Vec<Vec<i64>> = Vec::new();

        for (n, raw) in text.lines().enumerate() {
            let line: String = match raw.find('#') {
                Some(pos) => &raw[..pos],
                None => raw,
            }
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
            if line.is_empty() {
                continue;
            }

            let mut fields = Vec::new();
            for field in line.split(',') {
                fields.push(parse_number(n + 1, field)?);
            }
            if columns == 0 {
                columns = fields.len();
                if columns < 3 {
                    return Err(Error::NoNodes);
                }
            } else if fields.len() != columns {
                return Err(Error::FieldCount(n + 1, columns, fields.len()));
            }
            rows.push(fields);
        }

        if rows.is_empty() {
            return Err(Error::EmptyConfig);
        }

        let nodes = columns - 2;
        let mut params = vec![Vec::with_capacity(rows.len()); nodes];
        for row in &rows {
            for (node, list) in params.iter_mut().enumerate() {
                list.push(SdoParam::new(
                    row[0] as u16,
                    row[1] as u8,
                    row[2 + node] as u32,
                ));
            }
        }
        Ok(SdoConfig { params })
    }

    /// Number of nodes the table provides values for.
    pub fn node_count(&self) -> usize {
        self.params.len()
    }

    /// Number of parameters per node.
    pub fn param_count(&self) -> usize {
        self.params.get(0).map_or(0, Vec::len)
    }

    /// The parameter list for one node. Panics if `node` is out of
    /// range.
    pub fn node_params(&self, node: usize) -> &[SdoParam] {
        &self.params[node]
    }
}

fn parse_number(line: usize, field: &str) -> Result<i64> {
    let parsed = if let Some(hex) = field.strip_prefix("0x").or_else(|| field.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16)
    } else {
        field.parse()
    };
    parsed.map_err(|_| Error::BadNumber {
        line,
        field: field.into(),
    })
}

#[test]
fn test_parse_table() {
    let cfg = SdoConfig::parse(
        "# feedback configuration
         0x2001, 0, 100, 200   # nominal current
         0x2002, 3, 0x10, 0x20

         8193, 1, 5, 6
        ",
    )
    .unwrap();

    assert_eq!(cfg.node_count(), 2);
    assert_eq!(cfg.param_count(), 3);
    assert_eq!(cfg.node_params(0)[0], SdoParam::new(0x2001, 0, 100));
    assert_eq!(cfg.node_params(1)[0], SdoParam::new(0x2001, 0, 200));
    assert_eq!(cfg.node_params(0)[1], SdoParam::new(0x2002, 3, 0x10));
    assert_eq!(cfg.node_params(1)[1], SdoParam::new(0x2002, 3, 0x20));
    assert_eq!(cfg.node_params(1)[2], SdoParam::new(0x2001, 1, 6));
    assert_eq!(cfg.node_params(0)[2].bytecount, 4);
}

#[test]
fn test_parse_errors() {
    // rows with different field counts
    assert!(matches!(
        SdoConfig::parse("1,2,3\n1,2,3,4\n"),
        Err(Error::FieldCount(2, 3, 4))
    ));
    // no value columns
    assert!(matches!(SdoConfig::parse("0x2001,0\n"), Err(Error::NoNodes)));
    // nothing but comments and blank lines
    assert!(matches!(
        SdoConfig::parse("# nothing here\n\n"),
        Err(Error::EmptyConfig)
    ));
    // unparseable field
    assert!(matches!(
        SdoConfig::parse("0x2001,zero,1\n"),
        Err(Error::BadNumber { line: 1, .. })
    ));
}

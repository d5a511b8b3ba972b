use log::debug;

use crate::error::{Error, Result};
use crate::DocId;

/// A host value handed to the planner and cursor, mirroring the typed
/// values of the host engine.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Value {
    Null,
    Integer(i64),
    Text(Vec<u8>),
    Blob(Vec<u8>),
}

impl Value {
    pub fn as_match_pattern(&self) -> Result<&[u8]> {
        match self {
            Value::Text(bytes) => Ok(bytes),
            _ => Err(Error::TypeError("MATCH operand is not text")),
        }
    }

    pub fn as_row_id(&self) -> Result<DocId> {
        match self {
            Value::Integer(id) => Ok(*id),
            _ => Err(Error::TypeError("row id must be an integer")),
        }
    }
}

/// Columns of the logical table the host can constrain.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Column {
    Id,
    Text,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ConstraintOp {
    Eq,
    Match,
}

/// One WHERE-clause constraint as reported by the host.
#[derive(Clone, Copy, Debug)]
pub struct Constraint {
    pub column: Column,
    pub op: ConstraintOp,
    pub usable: bool,
}

/// One ORDER BY term as reported by the host, outermost first.
#[derive(Clone, Copy, Debug)]
pub struct OrderBy {
    pub column: Column,
    pub desc: bool,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Strategy {
    FullScan,
    MatchScan,
    IdLookup,
}

/// Id ordering the cursor will produce. `Unordered` means the host must
/// sort itself if it wants one.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum IdOrder {
    Unordered,
    Asc,
    Desc,
}

pub const COST_FULL_SCAN: f64 = 499_979.0;
pub const COST_MATCH_SCAN: f64 = 19.0;
pub const COST_ID_LOOKUP: f64 = 1.0;

/// The chosen scan strategy. `arguments` lists the constraint indices whose
/// values must be passed to `Cursor::filter`, in argument order.
#[derive(Clone, Debug)]
pub struct Plan {
    pub strategy: Strategy,
    pub order: IdOrder,
    pub cost: f64,
    pub arguments: Vec<usize>,
}

/// Pick exactly one strategy for the given constraints.
///
/// An equality on the id column wins outright; otherwise any usable MATCH
/// on the text column selects a match scan taking every MATCH operand as an
/// argument; otherwise a full table scan. Ordering on the id column is
/// consumed in either direction; ordering on the text column never is.
pub fn plan(constraints: &[Constraint], order_by: &[OrderBy]) -> Plan {
    let mut strategy = Strategy::FullScan;
    let mut cost = COST_FULL_SCAN;
    let mut arguments = Vec::new();

    for (i, c) in constraints.iter().enumerate() {
        if !c.usable {
            continue;
        }
        match (c.column, c.op) {
            (Column::Id, ConstraintOp::Eq) => {
                strategy = Strategy::IdLookup;
                cost = COST_ID_LOOKUP;
                arguments = vec![i];
                break;
            }
            (Column::Text, ConstraintOp::Match) if cost > COST_MATCH_SCAN => {
                strategy = Strategy::MatchScan;
                cost = COST_MATCH_SCAN;
            }
            _ => {}
        }
    }

    if strategy == Strategy::MatchScan {
        // Take every usable MATCH operand; they combine by AND.
        arguments = constraints
            .iter()
            .enumerate()
            .filter(|(_, c)| {
                c.usable && c.column == Column::Text && c.op == ConstraintOp::Match
            })
            .map(|(i, _)| i)
            .collect();
    }

    // Consume ORDER BY terms on the id column. Walk outermost last so the
    // outermost requested direction wins; any ordering on the text column
    // cannot be consumed and clears the rest.
    let mut order = IdOrder::Unordered;
    for ob in order_by.iter().rev() {
        match ob.column {
            Column::Id => order = if ob.desc { IdOrder::Desc } else { IdOrder::Asc },
            Column::Text => {
                order = IdOrder::Unordered;
                break;
            }
        }
    }

    debug!(
        "planned {:?} (cost {}) order {:?} with {} argument(s)",
        strategy,
        cost,
        order,
        arguments.len()
    );
    Plan {
        strategy,
        order,
        cost,
        arguments,
    }
}

//! Query-plan abstraction consumed by the facade. Producing a `Plan` (SQL
//! tokenizing, parsing, expression evaluation) is explicitly out of scope;
//! the facade only knows how to apply one.

use catalog::{Column, IndexKind};
use common::{RecordBatch, Row, RowRef};
use types::Value;

/// A simple `column op value` predicate, the only shape a scan's filter can
/// take. Evaluated per row; there is no expression tree to walk.
#[derive(Clone, Debug, PartialEq)]
pub struct Predicate {
    pub column: String,
    pub op: CompareOp,
    pub value: Value,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Predicate {
    pub fn matches(&self, column_value: &Value) -> bool {
        match self.op {
            CompareOp::Eq => column_value.eq_same_type(&self.value) == Some(true),
            CompareOp::Ne => column_value.eq_same_type(&self.value) == Some(false),
            CompareOp::Lt => column_value.cmp_same_type(&self.value) == Some(std::cmp::Ordering::Less),
            CompareOp::Le => matches!(
                column_value.cmp_same_type(&self.value),
                Some(std::cmp::Ordering::Less | std::cmp::Ordering::Equal)
            ),
            CompareOp::Gt => column_value.cmp_same_type(&self.value) == Some(std::cmp::Ordering::Greater),
            CompareOp::Ge => matches!(
                column_value.cmp_same_type(&self.value),
                Some(std::cmp::Ordering::Greater | std::cmp::Ordering::Equal)
            ),
        }
    }
}

/// A parsed, validated operation over a named table — the unit of work the
/// facade executes. Carries concrete values rather than placeholders; the
/// prepared-plan cache amortises lookup/validation cost, not parsing, since
/// there is no SQL text to parse in the first place.
#[derive(Clone, Debug)]
pub enum Plan {
    CreateTable {
        table: String,
        columns: Vec<Column>,
    },
    CreateIndex {
        table: String,
        index_name: String,
        columns: Vec<String>,
    },
    Insert {
        table: String,
        row: Row,
    },
    Update {
        table: String,
        row_ref: RowRef,
        row: Row,
    },
    Delete {
        table: String,
        row_ref: RowRef,
    },
    Get {
        table: String,
        row_ref: RowRef,
    },
    Scan {
        table: String,
        predicate: Option<Predicate>,
    },
}

impl Plan {
    pub fn table_name(&self) -> &str {
        match self {
            Plan::CreateTable { table, .. }
            | Plan::CreateIndex { table, .. }
            | Plan::Insert { table, .. }
            | Plan::Update { table, .. }
            | Plan::Delete { table, .. }
            | Plan::Get { table, .. }
            | Plan::Scan { table, .. } => table,
        }
    }

    /// Whether this plan mutates table contents (and therefore must
    /// participate in a WAL commit). `CreateTable`/`CreateIndex` mutate the
    /// catalog directly and are never WAL-logged — schema changes are rare
    /// enough that rewriting the catalog file synchronously is adequate,
    /// and doing so keeps the WAL frame format limited to row effects.
    pub fn is_row_mutation(&self) -> bool {
        matches!(
            self,
            Plan::Insert { .. } | Plan::Update { .. } | Plan::Delete { .. }
        )
    }
}

/// Placeholder index kind for `Plan::CreateIndex`: always `Hash`, spelled
/// out here so callers don't need to depend on `catalog::IndexKind`
/// themselves just to build a plan.
pub fn hash_index_kind() -> IndexKind {
    IndexKind::Hash
}

/// Outcome of executing one [`Plan`].
#[derive(Debug)]
pub enum QueryResult {
    Rows(RecordBatch),
    RowRef(RowRef),
    Count(u64),
    Empty,
}

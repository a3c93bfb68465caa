//! Target database dialects

use serde::{Deserialize, Serialize};
use std::fmt;
use strum_macros::{EnumIter, EnumString, IntoStaticStr};

use crate::parser::StatementKind;

/// A supported SQL dialect.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    EnumIter,
    EnumString,
    IntoStaticStr,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    Postgres,
    Mysql,
    Sqlite,
    Mariadb,
}

impl Dialect {
    /// Whether the dialect keeps a RETURNING clause for the given statement
    /// kind. INSERT ... RETURNING is accepted everywhere; UPDATE and DELETE
    /// support varies.
    pub fn supports_returning(self, kind: StatementKind) -> bool {
        match kind {
            StatementKind::Insert => true,
            StatementKind::Update => matches!(self, Self::Postgres | Self::Sqlite),
            StatementKind::Delete => {
                matches!(self, Self::Postgres | Self::Sqlite | Self::Mariadb)
            }
            StatementKind::Select => false,
        }
    }

    /// The dialect's spelling of "current time". MySQL-family engines use
    /// `NOW()`, everything else the standard `CURRENT_TIMESTAMP`.
    pub fn current_timestamp(self) -> &'static str {
        match self {
            Self::Mysql | Self::Mariadb => "NOW()",
            Self::Postgres | Self::Sqlite => "CURRENT_TIMESTAMP",
        }
    }

    /// MariaDB follows MySQL for every construct the pattern table covers.
    pub fn family(self) -> Self {
        match self {
            Self::Mariadb => Self::Mysql,
            other => other,
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.into())
    }
}

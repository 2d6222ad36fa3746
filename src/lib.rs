//! An embedded relational database in a single file: fixed-size pages under
//! a write-back pager, a b-tree of integer keys to typed-tuple records, and
//! a small stack machine fed by a SQL lexer/parser/optimizer/code-generator
//! pipeline.
//!
//! ```no_run
//! use minidb::Database;
//!
//! # fn main() -> minidb::Result<()> {
//! let mut db = Database::open("example.mdb")?;
//! db.execute("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)")?;
//! db.execute("INSERT INTO users VALUES (1, 'Alice')")?;
//! let rows = db.execute("SELECT * FROM users")?;
//! db.close()?;
//! # Ok(())
//! # }
//! ```

pub mod btree;
pub mod cell;
pub mod database;
pub mod errors;
pub mod page;
pub mod pager;
pub mod record;
pub mod schema;
pub mod sql;
pub mod util;
pub mod vm;

pub use database::Database;
pub use errors::{DbError, Result};
pub use record::{Record, Value};

use anyhow::{bail, Result};
use env_logger::Env;

use minidb::Database;

// Small driver so the library can be exercised from a shell without a
// separate project. Usage: minidb <database-file> <sql> [<sql> ...]
fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let args = std::env::args().collect::<Vec<_>>();
    match args.len() {
        0 | 1 => bail!("missing <database path> and <sql statement>"),
        2 => bail!("missing <sql statement>"),
        _ => {}
    }

    let mut db = Database::open(&args[1])?;
    for sql in &args[2..] {
        let rows = db.execute(sql)?;
        for row in rows {
            println!("{row:?}");
        }
    }
    db.close()?;

    Ok(())
}

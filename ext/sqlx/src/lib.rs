//! rowbridge driver plugin exposing SQLite through sqlx.
//!
//! Build as a `cdylib` and point `driverpath` at the resulting library.

mod drivers;

rowbridge_driver::export_driver_v1! {
    "rowbridge.sqlx.SqliteDriver" => drivers::sqlite::create,
}

//! Database views over the quote table.

use ::duckdb::Connection;

/// Create views used by point lookups and operators.
///
/// - `v_latest_quotes`: newest observation per symbol
///
/// # Errors
/// Returns an error if the view creation SQL fails to execute.
pub fn create_views(connection: &Connection) -> Result<(), ::duckdb::Error> {
    connection.execute_batch(
        r"
CREATE OR REPLACE VIEW v_latest_quotes AS
SELECT * EXCLUDE (rn)
FROM (
    SELECT
        *,
        ROW_NUMBER() OVER (PARTITION BY symbol ORDER BY observed_at DESC) AS rn
    FROM quotes
)
WHERE rn = 1;
",
    )
}

/// CSV export of materialized tables.
pub mod export;

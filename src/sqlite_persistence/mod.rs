mod schema_def;

pub use schema_def::{
    drop_all_user_tables, list_user_tables, Column, ForeignKey, OnDelete, SqlType, Table,
};

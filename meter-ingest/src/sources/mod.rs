pub mod row_file;

pub use row_file::RowFileSource;

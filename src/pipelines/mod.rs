pub mod merge_fastqs;
pub mod collate;

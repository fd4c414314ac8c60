pub mod command;
pub mod fastq;
pub mod file;
pub mod manifest;
pub mod system;

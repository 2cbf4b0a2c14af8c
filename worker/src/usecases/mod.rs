pub mod process_jobs;

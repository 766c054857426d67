mod config_tests;
mod detection_tests;
mod execution_tests;
mod lifecycle_tests;

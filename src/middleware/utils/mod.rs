pub mod db_utils;
pub mod extractor_utils;
pub mod string_utils;

// ------------------------------------------------------------------------------------------------
// Engine unit tests
// ------------------------------------------------------------------------------------------------

pub mod helpers;

mod tests_persistence;
mod tests_text_media;

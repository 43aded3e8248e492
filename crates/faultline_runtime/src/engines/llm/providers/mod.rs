pub mod openai;

#[cfg(any(test, feature = "test-suite"))]
pub mod scripted;

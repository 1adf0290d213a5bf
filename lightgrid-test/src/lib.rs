mod helpers;
mod runner;

pub use tokio::test as test_attr;

pub use helpers::*;
pub use runner::{ClusterContents, TestRunner, TestRunnerBuilder};

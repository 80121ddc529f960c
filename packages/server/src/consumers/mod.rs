pub mod eval_result;

pub use eval_result::consume_eval_results;

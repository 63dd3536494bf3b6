use anyhow::Result;
use promptcheck_types::EvaluationResults;

/// Assert the overall pass rate meets a threshold.
///
/// Use this in your `#[tokio::test]` functions.
///
/// # Example
/// ```ignore
/// #[tokio::test]
/// async fn test_my_prompt() -> Result<()> {
///     let runner = EvaluationRunner::builder()
///         .config(config)
///         .agent(agent)
///         .build()?;
///
///     let results = runner.run(None).await?;
///     assert_pass_rate(&results, 0.8)?;
///     Ok(())
/// }
/// ```
pub fn assert_pass_rate(results: &EvaluationResults, min_pass_rate: f64) -> Result<()> {
    let summary = results.summarize();
    if summary.pass_rate < min_pass_rate {
        anyhow::bail!(
            "evaluation failed: pass rate {:.1}% is below threshold {:.1}%\n{}",
            summary.pass_rate * 100.0,
            min_pass_rate * 100.0,
            results.summary_table()
        );
    }
    Ok(())
}

/// Assert every test case passed for every provider.
pub fn assert_all_passed(results: &EvaluationResults) -> Result<()> {
    let summary = results.summarize();
    if summary.passed != summary.total {
        anyhow::bail!(
            "evaluation failed: {}/{} cases passed\n{}",
            summary.passed,
            summary.total,
            results.summary_table()
        );
    }
    Ok(())
}

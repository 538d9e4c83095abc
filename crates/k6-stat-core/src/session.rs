use serde::{Deserialize, Serialize};

use crate::error::StatError;
use crate::report;
use crate::samples::{diff_samples, SortBy, Test, TestSamples, TestSamplesDiff};
use crate::store::{load_test_samples, SampleFilter, SampleSource, TestFilter, TestIdFilter};

const NO_TEST: &str = "select test with 'select' command";
const NO_REFERENCE: &str = "select reference test with 'reference' command";

/// Label and url patterns applied when a dataset is loaded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SessionFilter {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub label: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
    #[serde(rename = "no-url", default, skip_serializing_if = "Vec::is_empty")]
    pub skip_url: Vec<String>,
}

impl std::fmt::Display for SessionFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Filter:")?;
        if !self.label.is_empty() {
            write!(f, " Label {:?}", self.label)?;
        }
        if !self.url.is_empty() {
            write!(f, " Url {:?}", self.url)?;
        }
        if !self.skip_url.is_empty() {
            write!(f, " Skip url {:?}", self.skip_url)?;
        }
        Ok(())
    }
}

/// How a test run is picked for `select` / `reference`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestSelector {
    /// Position in the last loaded tests list.
    Number(usize),
    /// Run identity, looked up in storage.
    Id(TestIdFilter),
}

/// Operator state: the last tests list, the current filter and the
/// selected and reference datasets.
#[derive(Debug, Clone, Default)]
pub struct Session {
    tests: Vec<Test>,
    filter: SessionFilter,
    selected: Option<TestSamples>,
    reference: Option<TestSamples>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    // -----------------------------------------------------------------------
    // Tests list
    // -----------------------------------------------------------------------

    /// Query test runs and remember them for selection by number.
    pub async fn load_tests<S>(
        &mut self,
        source: &S,
        filter: &TestFilter,
    ) -> Result<&[Test], StatError>
    where
        S: SampleSource + Sync,
    {
        self.tests = source.get_tests(filter).await?;
        Ok(&self.tests)
    }

    pub fn set_tests(&mut self, tests: Vec<Test>) {
        self.tests = tests;
    }

    pub fn tests(&self) -> &[Test] {
        &self.tests
    }

    pub fn test_by_number(&self, n: usize) -> Result<&Test, StatError> {
        self.tests.get(n).ok_or_else(|| {
            StatError::Validation(format!(
                "test number {n} out of range, {} tests loaded",
                self.tests.len()
            ))
        })
    }

    /// Resolve `selector` to a test run.
    pub async fn resolve_test<S>(
        &self,
        source: &S,
        selector: TestSelector,
    ) -> Result<Test, StatError>
    where
        S: SampleSource + Sync,
    {
        match selector {
            TestSelector::Number(n) => self.test_by_number(n).cloned(),
            TestSelector::Id(filter) => source.get_test_by_id(&filter).await,
        }
    }

    // -----------------------------------------------------------------------
    // Filter
    // -----------------------------------------------------------------------

    pub fn set_filter(&mut self, filter: SessionFilter) {
        self.filter = filter;
    }

    pub fn filter(&self) -> &SessionFilter {
        &self.filter
    }

    /// Sample filter for `test` with the current label and url patterns.
    pub fn sample_filter_for(&self, test: &Test) -> SampleFilter {
        SampleFilter::for_test(test)
            .label(self.filter.label.clone())
            .url(self.filter.url.clone())
            .skip_url(self.filter.skip_url.clone())
    }

    /// Resolve `selector` and load its merged samples with the current filter.
    pub async fn load_samples<S>(
        &self,
        source: &S,
        selector: TestSelector,
    ) -> Result<TestSamples, StatError>
    where
        S: SampleSource + Sync,
    {
        let test = self.resolve_test(source, selector).await?;
        let filter = self.sample_filter_for(&test);
        load_test_samples(source, &test, &filter).await
    }

    // -----------------------------------------------------------------------
    // Datasets
    // -----------------------------------------------------------------------

    pub fn set_selected(&mut self, samples: TestSamples) {
        self.selected = Some(samples);
    }

    pub fn set_reference(&mut self, samples: TestSamples) {
        self.reference = Some(samples);
    }

    pub fn selected(&self) -> Result<&TestSamples, StatError> {
        self.selected
            .as_ref()
            .ok_or_else(|| StatError::NotSelected(NO_TEST.to_string()))
    }

    pub fn reference(&self) -> Result<&TestSamples, StatError> {
        self.reference
            .as_ref()
            .ok_or_else(|| StatError::NotSelected(NO_REFERENCE.to_string()))
    }

    // -----------------------------------------------------------------------
    // Reports
    // -----------------------------------------------------------------------

    /// Rank the selected dataset in place and render its top `count` records
    /// per label.
    pub fn top(&mut self, sort_by: SortBy, count: usize) -> Result<String, StatError> {
        let samples = self
            .selected
            .as_mut()
            .ok_or_else(|| StatError::NotSelected(NO_TEST.to_string()))?;
        Ok(render_ranked(samples, "test", sort_by, count))
    }

    /// Same as [`Session::top`] for the reference dataset.
    pub fn reference_top(&mut self, sort_by: SortBy, count: usize) -> Result<String, StatError> {
        let samples = self
            .reference
            .as_mut()
            .ok_or_else(|| StatError::NotSelected(NO_REFERENCE.to_string()))?;
        Ok(render_ranked(samples, "ref", sort_by, count))
    }

    /// Compare the selected dataset against the reference and rank the
    /// result by absolute value, or by delta when `by_diff` is set.
    pub fn compare(&self, sort_by: SortBy, by_diff: bool) -> Result<TestSamplesDiff, StatError> {
        let mut diff = diff_samples(self.selected()?, self.reference()?);
        diff.sort(sort_by, by_diff);
        Ok(diff)
    }

    /// Render the top `count` compared records per label.
    pub fn diff(&self, sort_by: SortBy, by_diff: bool, count: usize) -> Result<String, StatError> {
        let diff = self.compare(sort_by, by_diff)?;
        let mut out = report::render_test(&diff.test, "test", true);
        out.push_str(&report::render_test(&diff.reference, "ref", false));
        out.push('\n');
        out.push_str(&report::render_top_diff(&diff, count));
        Ok(out)
    }
}

fn render_ranked(samples: &mut TestSamples, descr: &str, sort_by: SortBy, count: usize) -> String {
    samples.sort(sort_by);
    let mut out = report::render_test(&samples.test, descr, true);
    out.push('\n');
    out.push_str(&report::render_top(samples, count));
    out
}

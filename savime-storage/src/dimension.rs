use std::fmt::{Display, Formatter};
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use savime_dtype::DataType;
use savime_error::{SavimeResult, savime_bail, savime_err};

use crate::Dataset;

/// How the logical coordinates of a dimension are obtained from real indices.
#[derive(Debug, Clone)]
pub enum DimensionType {
    /// `logical = lower_bound + real * spacing`.
    Implicit,
    /// `logical = mapping[real]`.
    Explicit(Dataset),
}

/// One axis of a typed array.
#[derive(Debug, Clone)]
pub struct Dimension {
    name: String,
    data_type: DataType,
    lower_bound: f64,
    upper_bound: f64,
    spacing: f64,
    real_lower_bound: i64,
    real_upper_bound: i64,
    dimension_type: DimensionType,
}

impl Dimension {
    /// An evenly spaced axis covering `[lower_bound, upper_bound]`.
    pub fn implicit(
        name: impl Into<String>,
        data_type: DataType,
        lower_bound: f64,
        upper_bound: f64,
        spacing: f64,
    ) -> SavimeResult<Self> {
        if !data_type.is_numeric() {
            savime_bail!(Unsupported: "{} dimensions", data_type);
        }
        if spacing.is_nan() || spacing <= 0.0 {
            savime_bail!("dimension spacing must be positive, got {}", spacing);
        }
        if upper_bound < lower_bound {
            savime_bail!(
                "dimension upper bound {} is below its lower bound {}",
                upper_bound,
                lower_bound
            );
        }
        let mut dimension = Self {
            name: name.into(),
            data_type,
            lower_bound,
            upper_bound,
            spacing,
            real_lower_bound: 0,
            real_upper_bound: 0,
            dimension_type: DimensionType::Implicit,
        };
        dimension.real_upper_bound = dimension.length() as i64 - 1;
        Ok(dimension)
    }

    /// An axis whose coordinates are listed in `mapping`, indexed by real position.
    pub fn explicit(name: impl Into<String>, mapping: Dataset) -> SavimeResult<Self> {
        let data_type = mapping.data_type();
        if !data_type.is_numeric() {
            savime_bail!(Unsupported: "{} dimensions", data_type);
        }
        if mapping.location().is_none() {
            savime_bail!("explicit dimension mapping must be a file backed dataset");
        }
        let length = mapping.entry_count();
        Ok(Self {
            name: name.into(),
            data_type,
            lower_bound: 0.0,
            upper_bound: length.saturating_sub(1) as f64,
            spacing: 1.0,
            real_lower_bound: 0,
            real_upper_bound: length as i64 - 1,
            dimension_type: DimensionType::Explicit(mapping),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn lower_bound(&self) -> f64 {
        self.lower_bound
    }

    pub fn upper_bound(&self) -> f64 {
        self.upper_bound
    }

    pub fn spacing(&self) -> f64 {
        self.spacing
    }

    pub fn real_lower_bound(&self) -> i64 {
        self.real_lower_bound
    }

    pub fn real_upper_bound(&self) -> i64 {
        self.real_upper_bound
    }

    pub fn dimension_type(&self) -> &DimensionType {
        &self.dimension_type
    }

    /// The coordinate list of an explicit dimension.
    pub fn mapping(&self) -> Option<&Dataset> {
        match &self.dimension_type {
            DimensionType::Implicit => None,
            DimensionType::Explicit(mapping) => Some(mapping),
        }
    }

    pub fn is_implicit(&self) -> bool {
        matches!(self.dimension_type, DimensionType::Implicit)
    }

    /// Number of coordinates along the axis.
    #[allow(clippy::cast_possible_truncation)]
    pub fn length(&self) -> usize {
        match &self.dimension_type {
            DimensionType::Implicit => {
                ((self.upper_bound - self.lower_bound) / self.spacing + 1e-6).floor() as usize + 1
            }
            DimensionType::Explicit(mapping) => mapping.entry_count(),
        }
    }
}

impl Display for Dimension {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.dimension_type {
            DimensionType::Implicit => write!(
                f,
                "{}:{}[{}:{}:{}]",
                self.name, self.data_type, self.lower_bound, self.upper_bound, self.spacing
            ),
            DimensionType::Explicit(_) => {
                write!(f, "{}:{}[{} explicit]", self.name, self.data_type, self.length())
            }
        }
    }
}

/// Encoding of the coordinates of one dimension inside a subtar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpecsType {
    /// A contiguous range of real indices, each repeated `adjacency` times per block.
    Ordered,
    /// A listed subset of coordinates, each repeated `adjacency` times per block.
    Partial,
    /// One coordinate stored per cell.
    Total,
}

impl Display for SpecsType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            SpecsType::Ordered => write!(f, "ORDERED"),
            SpecsType::Partial => write!(f, "PARTIAL"),
            SpecsType::Total => write!(f, "TOTAL"),
        }
    }
}

/// How a subtar covers one of its dimensions.
///
/// Cells are laid out so that the coordinate along this dimension changes every `adjacency`
/// cells and repeats every `skew = length * adjacency` cells.
#[derive(Debug)]
pub struct DimSpec {
    dimension: Arc<Dimension>,
    spec_type: SpecsType,
    lower_bound: i64,
    upper_bound: i64,
    adjacency: usize,
    dataset: Option<Dataset>,
    materialized: Mutex<Option<(usize, Dataset)>>,
}

impl DimSpec {
    fn new(
        dimension: Arc<Dimension>,
        spec_type: SpecsType,
        lower_bound: i64,
        upper_bound: i64,
        adjacency: usize,
        dataset: Option<Dataset>,
    ) -> SavimeResult<Self> {
        if lower_bound < 0 || upper_bound < lower_bound {
            savime_bail!(
                "invalid real range [{}, {}] for dimension {}",
                lower_bound,
                upper_bound,
                dimension.name()
            );
        }
        if adjacency == 0 {
            savime_bail!("adjacency must be at least 1");
        }
        Ok(Self {
            dimension,
            spec_type,
            lower_bound,
            upper_bound,
            adjacency,
            dataset,
            materialized: Mutex::new(None),
        })
    }

    /// Real indices `[lower_bound, upper_bound]` of `dimension`, in order.
    pub fn ordered(
        dimension: Arc<Dimension>,
        lower_bound: i64,
        upper_bound: i64,
        adjacency: usize,
    ) -> SavimeResult<Self> {
        if upper_bound > dimension.real_upper_bound() {
            savime_bail!(
                "real index {} is past the end of dimension {}",
                upper_bound,
                dimension.name()
            );
        }
        Self::new(
            dimension,
            SpecsType::Ordered,
            lower_bound,
            upper_bound,
            adjacency,
            None,
        )
    }

    /// The coordinates listed in `dataset`, which hold logical values for implicit dimensions
    /// and LONG real indices for explicit ones.
    pub fn partial(
        dimension: Arc<Dimension>,
        lower_bound: i64,
        upper_bound: i64,
        adjacency: usize,
        dataset: Dataset,
    ) -> SavimeResult<Self> {
        check_spec_dataset(&dimension, &dataset)?;
        let spec = Self::new(
            dimension,
            SpecsType::Partial,
            lower_bound,
            upper_bound,
            adjacency,
            Some(dataset.clone()),
        )?;
        if dataset.entry_count() != spec.length() {
            savime_bail!(
                "partial dataset holds {} values for a range of {}",
                dataset.entry_count(),
                spec.length()
            );
        }
        Ok(spec)
    }

    /// One coordinate per cell, listed in `dataset`.
    pub fn total(
        dimension: Arc<Dimension>,
        lower_bound: i64,
        upper_bound: i64,
        dataset: Dataset,
    ) -> SavimeResult<Self> {
        check_spec_dataset(&dimension, &dataset)?;
        Self::new(
            dimension,
            SpecsType::Total,
            lower_bound,
            upper_bound,
            1,
            Some(dataset),
        )
    }

    pub fn dimension(&self) -> &Arc<Dimension> {
        &self.dimension
    }

    pub fn spec_type(&self) -> SpecsType {
        self.spec_type
    }

    pub fn lower_bound(&self) -> i64 {
        self.lower_bound
    }

    pub fn upper_bound(&self) -> i64 {
        self.upper_bound
    }

    pub fn adjacency(&self) -> usize {
        self.adjacency
    }

    /// Cells after which the coordinate sequence repeats.
    pub fn skew(&self) -> usize {
        self.length() * self.adjacency
    }

    pub fn dataset(&self) -> Option<&Dataset> {
        self.dataset.as_ref()
    }

    pub(crate) fn require_dataset(&self) -> SavimeResult<&Dataset> {
        self.dataset.as_ref().ok_or_else(|| {
            savime_err!(
                "{} spec over {} has no dataset",
                self.spec_type,
                self.dimension.name()
            )
        })
    }

    /// Number of real indices covered.
    #[allow(clippy::cast_possible_truncation)]
    pub fn length(&self) -> usize {
        (self.upper_bound - self.lower_bound + 1) as usize
    }

    /// The materialized coordinates for a subtar of `total_length` cells, if already computed.
    pub fn materialized(&self, total_length: usize) -> Option<Dataset> {
        self.materialized
            .lock()
            .as_ref()
            .filter(|(len, _)| *len == total_length)
            .map(|(_, ds)| ds.clone())
    }

    pub(crate) fn set_materialized(&self, total_length: usize, dataset: Dataset) {
        *self.materialized.lock() = Some((total_length, dataset));
    }
}

fn check_spec_dataset(dimension: &Dimension, dataset: &Dataset) -> SavimeResult<()> {
    let expected = if dimension.is_implicit() {
        dimension.data_type()
    } else {
        DataType::Long
    };
    if dataset.data_type() != expected {
        savime_bail!(MismatchedTypes: expected, dataset.data_type());
    }
    Ok(())
}

/// A block of cells of a typed array: its dimension specs and the attribute datasets over them.
#[derive(Debug, Default)]
pub struct Subtar {
    dim_specs: Vec<Arc<DimSpec>>,
    datasets: FxHashMap<String, Dataset>,
}

impl Subtar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a dimension spec. A subtar either has only TOTAL specs or none.
    pub fn add_dim_spec(&mut self, spec: Arc<DimSpec>) -> SavimeResult<()> {
        let total = spec.spec_type() == SpecsType::Total;
        if self
            .dim_specs
            .iter()
            .any(|s| (s.spec_type() == SpecsType::Total) != total)
        {
            savime_bail!("TOTAL dimension specs cannot be mixed with other kinds");
        }
        self.dim_specs.push(spec);
        Ok(())
    }

    pub fn add_dataset(&mut self, attribute: impl Into<String>, dataset: Dataset) {
        self.datasets.insert(attribute.into(), dataset);
    }

    pub fn dim_specs(&self) -> &[Arc<DimSpec>] {
        &self.dim_specs
    }

    pub fn dataset(&self, attribute: &str) -> Option<&Dataset> {
        self.datasets.get(attribute)
    }

    pub fn dim_spec(&self, dimension: &str) -> Option<&Arc<DimSpec>> {
        self.dim_specs
            .iter()
            .find(|s| s.dimension().name() == dimension)
    }

    /// Number of cells.
    pub fn total_length(&self) -> usize {
        if let Some(total) = self
            .dim_specs
            .iter()
            .find(|s| s.spec_type() == SpecsType::Total)
        {
            return total.dataset().map(Dataset::entry_count).unwrap_or_default();
        }
        if self.dim_specs.is_empty() {
            return 0;
        }
        self.dim_specs.iter().map(|s| s.length()).product()
    }
}

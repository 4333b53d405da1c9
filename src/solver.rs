//! Thin safe layer over `highs-sys`, exposing only what the node
//! subproblems need: building a column-wise LP once, then changing row
//! bounds, appending cut rows and reading primal/dual solutions between
//! solves.

use std::convert::TryFrom;
use std::ffi::{c_void, CString};
use std::fmt::{Debug, Formatter};
use std::num::TryFromIntError;
use std::ops::{Bound, RangeBounds};
use std::os::raw::{c_char, c_int};

use highs_sys::*;

/// The kinds of results of an optimization
#[derive(Clone, Copy, Debug, PartialOrd, PartialEq, Ord, Eq)]
pub enum HighsModelStatus {
    NotSet = MODEL_STATUS_NOTSET as isize,
    LoadError = MODEL_STATUS_LOAD_ERROR as isize,
    ModelError = MODEL_STATUS_MODEL_ERROR as isize,
    PresolveError = MODEL_STATUS_PRESOLVE_ERROR as isize,
    SolveError = MODEL_STATUS_SOLVE_ERROR as isize,
    PostsolveError = MODEL_STATUS_POSTSOLVE_ERROR as isize,
    ModelEmpty = MODEL_STATUS_MODEL_EMPTY as isize,
    Infeasible = MODEL_STATUS_INFEASIBLE as isize,
    UnboundedOrInfeasible = MODEL_STATUS_UNBOUNDED_OR_INFEASIBLE as isize,
    Unbounded = MODEL_STATUS_UNBOUNDED as isize,
    Optimal = MODEL_STATUS_OPTIMAL as isize,
    ObjectiveBound = MODEL_STATUS_OBJECTIVE_BOUND as isize,
    ObjectiveTarget = MODEL_STATUS_OBJECTIVE_TARGET as isize,
    ReachedTimeLimit = MODEL_STATUS_REACHED_TIME_LIMIT as isize,
    ReachedIterationLimit = MODEL_STATUS_REACHED_ITERATION_LIMIT as isize,
    Unknown = MODEL_STATUS_UNKNOWN as isize,
}

/// An unexpected status code came back from HiGHS
#[derive(PartialEq, Clone, Copy)]
pub struct InvalidStatus(pub c_int);

impl Debug for InvalidStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} is not a valid HiGHS status", self.0)
    }
}

impl TryFrom<c_int> for HighsModelStatus {
    type Error = InvalidStatus;

    fn try_from(value: c_int) -> Result<Self, Self::Error> {
        match value {
            MODEL_STATUS_NOTSET => Ok(Self::NotSet),
            MODEL_STATUS_LOAD_ERROR => Ok(Self::LoadError),
            MODEL_STATUS_MODEL_ERROR => Ok(Self::ModelError),
            MODEL_STATUS_PRESOLVE_ERROR => Ok(Self::PresolveError),
            MODEL_STATUS_SOLVE_ERROR => Ok(Self::SolveError),
            MODEL_STATUS_POSTSOLVE_ERROR => Ok(Self::PostsolveError),
            MODEL_STATUS_MODEL_EMPTY => Ok(Self::ModelEmpty),
            MODEL_STATUS_INFEASIBLE => Ok(Self::Infeasible),
            MODEL_STATUS_UNBOUNDED => Ok(Self::Unbounded),
            MODEL_STATUS_UNBOUNDED_OR_INFEASIBLE => {
                Ok(Self::UnboundedOrInfeasible)
            }
            MODEL_STATUS_OPTIMAL => Ok(Self::Optimal),
            MODEL_STATUS_OBJECTIVE_BOUND => Ok(Self::ObjectiveBound),
            MODEL_STATUS_OBJECTIVE_TARGET => Ok(Self::ObjectiveTarget),
            MODEL_STATUS_REACHED_TIME_LIMIT => Ok(Self::ReachedTimeLimit),
            MODEL_STATUS_REACHED_ITERATION_LIMIT => {
                Ok(Self::ReachedIterationLimit)
            }
            MODEL_STATUS_UNKNOWN => Ok(Self::Unknown),
            n => Err(InvalidStatus(n)),
        }
    }
}

/// The status of a highs operation
#[derive(Clone, Copy, Debug, PartialOrd, PartialEq, Ord, Eq)]
pub enum HighsStatus {
    OK = 0,
    Warning = 1,
    Error = 2,
}

impl From<TryFromIntError> for HighsStatus {
    fn from(_: TryFromIntError) -> Self {
        Self::Error
    }
}

impl TryFrom<c_int> for HighsStatus {
    type Error = InvalidStatus;

    fn try_from(value: c_int) -> Result<Self, InvalidStatus> {
        match value {
            STATUS_OK => Ok(Self::OK),
            STATUS_WARNING => Ok(Self::Warning),
            STATUS_ERROR => Ok(Self::Error),
            n => Err(InvalidStatus(n)),
        }
    }
}

/// Values that can be assigned to a HiGHS option
pub trait HighsOptionValue {
    /// # Safety
    ///
    /// `highs` must point to a live HiGHS instance.
    unsafe fn apply_to_highs(
        self,
        highs: *mut c_void,
        option: *const c_char,
    ) -> c_int;
}

impl HighsOptionValue for bool {
    unsafe fn apply_to_highs(
        self,
        highs: *mut c_void,
        option: *const c_char,
    ) -> c_int {
        Highs_setBoolOptionValue(highs, option, if self { 1 } else { 0 })
    }
}

impl HighsOptionValue for i32 {
    unsafe fn apply_to_highs(
        self,
        highs: *mut c_void,
        option: *const c_char,
    ) -> c_int {
        Highs_setIntOptionValue(highs, option, self)
    }
}

impl HighsOptionValue for f64 {
    unsafe fn apply_to_highs(
        self,
        highs: *mut c_void,
        option: *const c_char,
    ) -> c_int {
        Highs_setDoubleOptionValue(highs, option, self)
    }
}

impl HighsOptionValue for &str {
    unsafe fn apply_to_highs(
        self,
        highs: *mut c_void,
        option: *const c_char,
    ) -> c_int {
        match CString::new(self) {
            Ok(value) => {
                Highs_setStringOptionValue(highs, option, value.as_ptr())
            }
            Err(_) => STATUS_ERROR,
        }
    }
}

fn bound_value(b: Bound<&f64>) -> Option<f64> {
    match b {
        Bound::Included(v) | Bound::Excluded(v) => Some(*v),
        Bound::Unbounded => None,
    }
}

fn lower_of(bounds: &impl RangeBounds<f64>) -> f64 {
    bound_value(bounds.start_bound()).unwrap_or(f64::NEG_INFINITY)
}

fn upper_of(bounds: &impl RangeBounds<f64>) -> f64 {
    bound_value(bounds.end_bound()).unwrap_or(f64::INFINITY)
}

fn c(n: usize) -> Result<HighsInt, HighsStatus> {
    Ok(n.try_into()?)
}

fn handle_status(status: c_int, call: &str) -> Result<(), HighsStatus> {
    match HighsStatus::try_from(status) {
        Ok(HighsStatus::OK) => Ok(()),
        Ok(HighsStatus::Warning) => {
            tracing::debug!("HiGHS emitted a warning on {call}");
            Ok(())
        }
        _ => Err(HighsStatus::Error),
    }
}

/// A linear problem being assembled column by column, before it is
/// passed to HiGHS.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Problem {
    pub col_cost: Vec<f64>,
    pub col_lower: Vec<f64>,
    pub col_upper: Vec<f64>,
    pub row_lower: Vec<f64>,
    pub row_upper: Vec<f64>,
    // (row indices, factors) for each column
    columns: Vec<(Vec<c_int>, Vec<f64>)>,
    num_nz: usize,
}

impl Problem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn num_cols(&self) -> usize {
        self.col_cost.len()
    }

    pub fn num_rows(&self) -> usize {
        self.row_lower.len()
    }

    /// Adds a variable with objective coefficient `cost`, returning its index
    pub fn add_column(
        &mut self,
        cost: f64,
        bounds: impl RangeBounds<f64>,
    ) -> usize {
        self.col_cost.push(cost);
        self.col_lower.push(lower_of(&bounds));
        self.col_upper.push(upper_of(&bounds));
        self.columns.push((vec![], vec![]));
        self.col_cost.len() - 1
    }

    /// Adds a constraint `lower <= sum(factor * col) <= upper`, returning
    /// its index
    pub fn add_row(
        &mut self,
        bounds: impl RangeBounds<f64>,
        factors: &[(usize, f64)],
    ) -> usize {
        let row = self.num_rows() as c_int;
        for &(col, factor) in factors {
            let column = &mut self.columns[col];
            column.0.push(row);
            column.1.push(factor);
            self.num_nz += 1;
        }
        self.row_lower.push(lower_of(&bounds));
        self.row_upper.push(upper_of(&bounds));
        self.num_rows() - 1
    }

    /// Every non-zero matrix coefficient, in column order
    pub fn matrix_values(&self) -> impl Iterator<Item = f64> + '_ {
        self.columns
            .iter()
            .flat_map(|(_, factors)| factors.iter().copied())
    }

    fn to_compressed_matrix_form(
        &self,
    ) -> Result<(Vec<HighsInt>, Vec<HighsInt>, Vec<f64>), HighsStatus> {
        let mut astart = Vec::with_capacity(self.num_cols() + 1);
        let mut aindex = Vec::with_capacity(self.num_nz);
        let mut avalue = Vec::with_capacity(self.num_nz);
        astart.push(0);
        for (rows, factors) in self.columns.iter() {
            aindex.extend_from_slice(rows);
            avalue.extend_from_slice(factors);
            astart.push(c(aindex.len())?);
        }
        Ok((astart, aindex, avalue))
    }

    /// Passes the problem to a new HiGHS instance as a minimization, without
    /// solving it yet.
    pub fn build_model(&self) -> Result<Model, HighsStatus> {
        let mut highs = HighsPtr::default();
        highs.make_quiet()?;
        let (astart, aindex, avalue) = self.to_compressed_matrix_form()?;
        let status = unsafe {
            Highs_passLp(
                highs.mut_ptr(),
                c(self.num_cols())?,
                c(self.num_rows())?,
                c(self.num_nz)?,
                MATRIX_FORMAT_COLUMN_WISE,
                OBJECTIVE_SENSE_MINIMIZE,
                0.0,
                self.col_cost.as_ptr(),
                self.col_lower.as_ptr(),
                self.col_upper.as_ptr(),
                self.row_lower.as_ptr(),
                self.row_upper.as_ptr(),
                astart.as_ptr(),
                aindex.as_ptr(),
                avalue.as_ptr(),
            )
        };
        handle_status(status, "Highs_passLp")?;
        Ok(Model { highs })
    }
}

#[derive(Debug)]
struct HighsPtr(*mut c_void);

// A HiGHS instance is only ever touched through `&mut Model`, so moving it
// across threads is sound.
unsafe impl Send for HighsPtr {}

impl Drop for HighsPtr {
    fn drop(&mut self) {
        unsafe { Highs_destroy(self.0) }
    }
}

impl Default for HighsPtr {
    fn default() -> Self {
        Self(unsafe { Highs_create() })
    }
}

impl HighsPtr {
    // some HiGHS getters are declared with a mutable pointer even though
    // they do not mutate the instance
    fn ptr(&self) -> *mut c_void {
        self.0
    }

    fn mut_ptr(&mut self) -> *mut c_void {
        self.0
    }

    fn make_quiet(&mut self) -> Result<(), HighsStatus> {
        // setting log_file causes a double free in some HiGHS versions
        self.set_option("output_flag", false)?;
        self.set_option("log_to_console", false)
    }

    fn set_option<V: HighsOptionValue>(
        &mut self,
        option: &str,
        value: V,
    ) -> Result<(), HighsStatus> {
        let name = CString::new(option).map_err(|_| HighsStatus::Error)?;
        let status =
            unsafe { value.apply_to_highs(self.mut_ptr(), name.as_ptr()) };
        handle_status(status, "Highs_setOptionValue")
    }
}

/// A HiGHS model that owns its solver instance
#[derive(Debug)]
pub struct Model {
    highs: HighsPtr,
}

impl Model {
    pub fn set_option<V: HighsOptionValue>(
        &mut self,
        option: &str,
        value: V,
    ) -> Result<(), HighsStatus> {
        self.highs.set_option(option, value)
    }

    pub fn solve(&mut self) -> Result<(), HighsStatus> {
        let status = unsafe { Highs_run(self.highs.mut_ptr()) };
        handle_status(status, "Highs_run")
    }

    pub fn status(&self) -> HighsModelStatus {
        let raw = unsafe { Highs_getModelStatus(self.highs.ptr()) };
        HighsModelStatus::try_from(raw).unwrap_or(HighsModelStatus::Unknown)
    }

    /// Appends a constraint to the loaded model and returns its row index
    pub fn add_row(
        &mut self,
        bounds: impl RangeBounds<f64>,
        factors: &[(usize, f64)],
    ) -> Result<usize, HighsStatus> {
        let mut cols = Vec::<HighsInt>::with_capacity(factors.len());
        let mut values = Vec::<f64>::with_capacity(factors.len());
        for &(col, value) in factors {
            cols.push(c(col)?);
            values.push(value);
        }
        let status = unsafe {
            Highs_addRow(
                self.highs.mut_ptr(),
                lower_of(&bounds),
                upper_of(&bounds),
                c(cols.len())?,
                cols.as_ptr(),
                values.as_ptr(),
            )
        };
        handle_status(status, "Highs_addRow")?;
        Ok(self.num_rows() - 1)
    }

    pub fn change_row_bounds(
        &mut self,
        row: usize,
        lower: f64,
        upper: f64,
    ) -> Result<(), HighsStatus> {
        if row >= self.num_rows() {
            return Err(HighsStatus::Error);
        }
        let status = unsafe {
            Highs_changeRowBounds(self.highs.mut_ptr(), c(row)?, lower, upper)
        };
        handle_status(status, "Highs_changeRowBounds")
    }

    pub fn change_col_bounds(
        &mut self,
        col: usize,
        lower: f64,
        upper: f64,
    ) -> Result<(), HighsStatus> {
        if col >= self.num_cols() {
            return Err(HighsStatus::Error);
        }
        let status = unsafe {
            Highs_changeColBounds(self.highs.mut_ptr(), c(col)?, lower, upper)
        };
        handle_status(status, "Highs_changeColBounds")
    }

    pub fn get_solution(&self) -> Solution {
        let cols = self.num_cols();
        let rows = self.num_rows();
        let mut solution = Solution {
            colvalue: vec![0.0; cols],
            coldual: vec![0.0; cols],
            rowvalue: vec![0.0; rows],
            rowdual: vec![0.0; rows],
        };
        unsafe {
            Highs_getSolution(
                self.highs.ptr(),
                solution.colvalue.as_mut_ptr(),
                solution.coldual.as_mut_ptr(),
                solution.rowvalue.as_mut_ptr(),
                solution.rowdual.as_mut_ptr(),
            );
        }
        solution
    }

    pub fn get_objective_value(&self) -> f64 {
        unsafe { Highs_getObjectiveValue(self.highs.ptr()) }
    }

    /// Drops the solver data of the last solve, keeping the model
    pub fn clear_solver(&mut self) {
        unsafe { Highs_clearSolver(self.highs.mut_ptr()) };
    }

    /// Writes the model to `path`; HiGHS picks the format from the extension
    pub fn write_model(&mut self, path: &str) -> Result<(), HighsStatus> {
        let filename = CString::new(path).map_err(|_| HighsStatus::Error)?;
        let status = unsafe {
            Highs_writeModel(self.highs.mut_ptr(), filename.as_ptr())
        };
        handle_status(status, "Highs_writeModel")
    }

    pub fn num_cols(&self) -> usize {
        let n = unsafe { Highs_getNumCols(self.highs.ptr()) };
        n.try_into().unwrap_or(0)
    }

    pub fn num_rows(&self) -> usize {
        let n = unsafe { Highs_getNumRows(self.highs.ptr()) };
        n.try_into().unwrap_or(0)
    }
}

/// Primal and dual values of the last solve
#[derive(Clone, Debug)]
pub struct Solution {
    pub colvalue: Vec<f64>,
    pub coldual: Vec<f64>,
    pub rowvalue: Vec<f64>,
    pub rowdual: Vec<f64>,
}

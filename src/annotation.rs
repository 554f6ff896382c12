use crate::identity::PatientIdentity;
use crate::view_state::ViewState;

/// Corner texts of one orthogonal view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Annotations {
    /// Patient identity and view orientation.
    pub identity: String,
    /// 1-based slice position and slice count.
    pub slice: String,
    pub window_level: String,
}

pub struct AnnotationFormatter;

impl AnnotationFormatter {
    pub fn format(state: &ViewState, identity: &PatientIdentity, label: &str) -> Annotations {
        let (position, total) = Self::slice_position(state);
        let window_level = state.window_level();
        Annotations {
            identity: format!("{}  ID: {}\n{}", identity.name, identity.id, label),
            slice: format!("Slice: {position} / {total}"),
            window_level: format!(
                "W: {}  L: {}",
                window_level.window.round() as i64,
                window_level.level.round() as i64
            ),
        }
    }

    /// Returns `(position, total)`, both 1-based and within `[1, total]`.
    pub fn slice_position(state: &ViewState) -> (usize, usize) {
        let total = (state.slice_max() - state.slice_min() + 1).max(1);
        let position = (state.slice().saturating_sub(state.slice_min()) + 1).clamp(1, total);
        (position, total)
    }
}

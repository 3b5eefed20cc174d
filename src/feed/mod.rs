pub mod reconciler;
pub mod reducer;

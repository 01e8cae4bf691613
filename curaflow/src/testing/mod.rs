//! Testing utilities for curaflow workflows.
//!
//! This module provides reusable stages with controllable behavior:
//! - [`ScriptedStage`] returns queued results
//! - [`GatedStage`] blocks until released
//! - [`SpinCpuStage`] burns CPU on the worker pool
//! - [`RecordingStage`] records the order in which stages ran

mod stages;

pub use stages::{GatedStage, RecordingStage, ScriptedStage, SpinCpuStage};

pub mod blob_filter;
pub mod clock;
pub mod direction;
pub mod flow_stabilizer;
pub mod intersection_state;
pub mod phase_scheduler;
pub mod synthetic_flow;

pub mod calendar;
pub mod catalog;
pub mod flow;
pub mod slots;

pub use catalog::{AvailabilityApi, AvailabilityClient};
pub use flow::{
    BookingFlowController, BookingRequest, FlowState, ProvidersRequest, SlotsRequest, TypesRequest,
};
pub use slots::{DayWindow, SelectionKey, SlotQuery};

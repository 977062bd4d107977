//! View layer: binds a displayed list to a real or virtual folder

mod mail_view;
mod projection;
mod wrapper;

pub use mail_view::MailView;
pub use projection::{Projection, ViewRow, sort_messages, thread_key};
pub use wrapper::{ViewContext, ViewListener, ViewState, ViewTarget, ViewWrapper};

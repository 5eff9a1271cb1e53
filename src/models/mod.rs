pub mod bill;
pub mod event;
pub mod order;
pub mod payment;
pub mod ticket;

pub use bill::{Bill, BillStatus};
pub use event::{Event, EventSession, FormTemplate, TicketType};
pub use order::{Order, OrderItem, OrderItemStatus, OrderStatus, RegistrationForm};
pub use payment::{Payment, PaymentMethod, PaymentStatus, PaymentUpdate};
pub use ticket::{Ticket, TicketStatus};

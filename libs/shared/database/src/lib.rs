pub mod store;
pub mod memory;
pub mod supabase;

pub use store::ClinicStore;
pub use memory::MemoryStore;
pub use supabase::{SupabaseClient, SupabaseStore};

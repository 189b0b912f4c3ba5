pub mod item_loader;

pub use item_loader::{load_items, load_items_from_dir, load_replay_items, parse_csv, parse_lines};

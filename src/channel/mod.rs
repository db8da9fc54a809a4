// Per-channel commitment state machine for a bidirectional off-chain
// payment protocol.
//
// Written in 2024 by
//     Dr. Maxim Orlovsky <orlovsky@pandoracore.com>
//
// To the extent possible under law, the author(s) have dedicated all
// copyright and related and neighboring rights to this software to
// the public domain worldwide. This software is distributed without
// any warranty.
//
// You should have received a copy of the MIT License
// along with this software.
// If not, see <https://opensource.org/licenses/MIT>.

mod lifecycle;
mod commands;
mod events;
mod machine;

mod channel;

pub use channel::{Channel, ChannelError, ChannelState, Direction};
pub use commands::Command;
pub use events::Event;
pub use lifecycle::Lifecycle;
pub use machine::{transition, Trigger, TransitionError};

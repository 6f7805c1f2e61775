use std::sync::Arc;

use tb_core::EngineObj;

use crate::bridge::BridgeCtx;

macro_rules! pinned_handle {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        pub struct $name {
            ctx: Arc<BridgeCtx>,
            obj: EngineObj,
            released: bool,
        }

        impl $name {
            pub(crate) fn new(ctx: Arc<BridgeCtx>, obj: EngineObj) -> Self {
                Self {
                    ctx,
                    obj,
                    released: false,
                }
            }

            pub(crate) fn obj(&self) -> EngineObj {
                self.obj
            }

            /// Drop the pin now instead of at drop. Safe from any thread.
            pub fn release(mut self) {
                self.released = true;
                self.ctx.release_obj(self.obj);
            }
        }

        impl Drop for $name {
            fn drop(&mut self) {
                if !self.released {
                    self.ctx.release_obj(self.obj);
                }
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.debug_struct(stringify!($name))
                    .field("obj", &self.obj)
                    .finish()
            }
        }
    };
}

pinned_handle!(
    /// Owning handle to a compiled script. Keeps the engine-side object pinned
    /// against collection for as long as the handle lives.
    Script
);

pinned_handle!(
    /// Owning handle to an extracted translation table.
    Translations
);

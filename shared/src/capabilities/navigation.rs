use crux_core::capability::{Capability, CapabilityContext, Operation};
use serde::{Deserialize, Serialize};

use crate::navigation::Route;

/// Keeps the shell's location in step with the committed route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", content = "data")]
pub enum NavigationOperation {
    Push(Route),
}

impl Operation for NavigationOperation {
    type Output = ();
}

pub struct Navigation<Ev> {
    context: CapabilityContext<NavigationOperation, Ev>,
}

impl<Ev> Clone for Navigation<Ev> {
    fn clone(&self) -> Self {
        Self {
            context: self.context.clone(),
        }
    }
}

impl<Ev> Capability<Ev> for Navigation<Ev> {
    type Operation = NavigationOperation;
    type MappedSelf<MappedEv> = Navigation<MappedEv>;

    fn map_event<F, NewEv>(&self, f: F) -> Self::MappedSelf<NewEv>
    where
        F: Fn(NewEv) -> Ev + Send + Sync + 'static,
        Ev: 'static,
        NewEv: 'static + Send,
    {
        Navigation::new(self.context.map_event(f))
    }
}

impl<Ev> Navigation<Ev>
where
    Ev: 'static,
{
    pub fn new(context: CapabilityContext<NavigationOperation, Ev>) -> Self {
        Self { context }
    }

    pub fn push(&self, route: Route) {
        let ctx = self.context.clone();
        self.context.spawn(async move {
            ctx.notify_shell(NavigationOperation::Push(route)).await;
        });
    }
}

//! [`QueuedOrder`]-related [`Database`] implementations.

use common::operations::{By, Insert, Select, Update};
use tracerr::Traced;

use crate::{
    domain::{session, QueuedOrder},
    infra::{
        database::{
            self,
            memory::{Connection, Memory, Tx},
        },
        Database,
    },
};

impl<C> Database<Select<By<Option<QueuedOrder>, session::Id>>> for Memory<C>
where
    C: Connection,
{
    type Ok = Option<QueuedOrder>;
    type Err = Traced<database::Error>;

    async fn execute(
        &self,
        Select(by): Select<By<Option<QueuedOrder>, session::Id>>,
    ) -> Result<Self::Ok, Self::Err> {
        let session_id = by.into_inner();
        Ok(self.view(|v| v.order(&session_id).cloned()).await)
    }
}

impl Database<Insert<QueuedOrder>> for Memory<Tx> {
    type Ok = ();
    type Err = Traced<database::Error>;

    async fn execute(
        &self,
        Insert(order): Insert<QueuedOrder>,
    ) -> Result<Self::Ok, Self::Err> {
        self.write(|p| p.put_order(order, true));
        Ok(())
    }
}

impl Database<Update<QueuedOrder>> for Memory<Tx> {
    type Ok = ();
    type Err = Traced<database::Error>;

    async fn execute(
        &self,
        Update(order): Update<QueuedOrder>,
    ) -> Result<Self::Ok, Self::Err> {
        self.write(|p| p.put_order(order, false));
        Ok(())
    }
}

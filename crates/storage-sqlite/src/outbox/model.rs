use diesel::prelude::*;

#[derive(Queryable, Selectable, Debug, Clone, PartialEq, Eq)]
#[diesel(table_name = crate::schema::change_outbox)]
pub struct OutboxRowDB {
    pub id: i32,
    pub stream: String,
    pub payload: String,
    pub created_at: String,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::change_outbox)]
pub struct NewOutboxRowDB {
    pub stream: String,
    pub payload: String,
    pub created_at: String,
}

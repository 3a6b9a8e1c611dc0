use crate::DomainResult;
use crate::directory::{Community, Person, PolicyTag, Subscription};
use crate::ports::BoxFuture;

pub trait DirectoryRepository: Send + Sync {
    fn community_by_id(
        &self,
        community_id: &str,
    ) -> BoxFuture<'_, DomainResult<Option<Community>>>;

    fn community_by_name(&self, name: &str) -> BoxFuture<'_, DomainResult<Option<Community>>>;

    fn list_communities(&self) -> BoxFuture<'_, DomainResult<Vec<Community>>>;

    fn upsert_community(&self, community: &Community) -> BoxFuture<'_, DomainResult<Community>>;

    fn person_by_id(&self, person_id: &str) -> BoxFuture<'_, DomainResult<Option<Person>>>;

    fn person_by_handle(&self, handle: &str) -> BoxFuture<'_, DomainResult<Option<Person>>>;

    fn insert_person(&self, person: &Person) -> BoxFuture<'_, DomainResult<Person>>;

    fn tag_by_text(&self, tag: &str) -> BoxFuture<'_, DomainResult<Option<PolicyTag>>>;

    fn list_tags(&self) -> BoxFuture<'_, DomainResult<Vec<PolicyTag>>>;

    fn insert_tag(&self, tag: &PolicyTag) -> BoxFuture<'_, DomainResult<PolicyTag>>;

    fn subscription(
        &self,
        community_id: &str,
        tag_id: &str,
    ) -> BoxFuture<'_, DomainResult<Option<Subscription>>>;

    fn upsert_subscription(
        &self,
        subscription: &Subscription,
    ) -> BoxFuture<'_, DomainResult<Subscription>>;

    /// Tags with a live (not soft-deleted) subscription for the community.
    fn subscribed_tags(&self, community_id: &str) -> BoxFuture<'_, DomainResult<Vec<PolicyTag>>>;
}

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::error::{ContentError, Result};
use crate::logic::events::EventBus;
use crate::model::{EventPayload, EventTopic, Group, Id, Permission, Role, User};
use crate::store::{Graph, GraphStore, PermissionCache};

/// Users, groups and roles with a read-through cache of effective permissions.
///
/// Every mutation clears the whole cache and announces it on
/// `mesh.clear-permission-store`, so other nodes can drop theirs.
pub struct PermissionService<S: GraphStore> {
    store: Arc<S>,
    cache: PermissionCache,
    events: EventBus,
    origin: String,
}

/// Relation changes between groups and their members
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Membership {
    Add,
    Remove,
}

impl<S: GraphStore> PermissionService<S> {
    pub fn new(store: Arc<S>, cache: PermissionCache, events: EventBus, origin: String) -> Self {
        Self {
            store,
            cache,
            events,
            origin,
        }
    }

    pub fn cache(&self) -> &PermissionCache {
        &self.cache
    }

    pub async fn create_user(&self, username: &str) -> Result<User> {
        let username = username.to_string();
        let user = self
            .store
            .write(move |graph| {
                if graph.users.values().any(|u| u.username == username) {
                    return Err(ContentError::Conflict(format!("user '{}' already exists", username)));
                }
                let user = User::new(username);
                graph.users.insert(user.uuid.clone(), user.clone());
                Ok(user)
            })
            .await?;
        log::debug!("Created user '{}'", user.username);
        Ok(user)
    }

    pub async fn create_group(&self, name: &str) -> Result<Group> {
        let name = name.to_string();
        self.store
            .write(move |graph| {
                if graph.groups.values().any(|g| g.name == name) {
                    return Err(ContentError::Conflict(format!("group '{}' already exists", name)));
                }
                let group = Group::new(name);
                graph.groups.insert(group.uuid.clone(), group.clone());
                Ok(group)
            })
            .await
    }

    pub async fn create_role(&self, name: &str) -> Result<Role> {
        let name = name.to_string();
        self.store
            .write(move |graph| {
                if graph.roles.values().any(|r| r.name == name) {
                    return Err(ContentError::Conflict(format!("role '{}' already exists", name)));
                }
                let role = Role::new(name);
                graph.roles.insert(role.uuid.clone(), role.clone());
                Ok(role)
            })
            .await
    }

    pub async fn add_user_to_group(&self, user_uuid: &Id, group_uuid: &Id) -> Result<()> {
        self.change_group_users(user_uuid, group_uuid, Membership::Add).await
    }

    pub async fn remove_user_from_group(&self, user_uuid: &Id, group_uuid: &Id) -> Result<()> {
        self.change_group_users(user_uuid, group_uuid, Membership::Remove).await
    }

    pub async fn add_role_to_group(&self, role_uuid: &Id, group_uuid: &Id) -> Result<()> {
        self.change_group_roles(role_uuid, group_uuid, Membership::Add).await
    }

    pub async fn remove_role_from_group(&self, role_uuid: &Id, group_uuid: &Id) -> Result<()> {
        self.change_group_roles(role_uuid, group_uuid, Membership::Remove).await
    }

    /// Grant permissions on `target_uuid` to a role
    pub async fn grant(&self, role_uuid: &Id, target_uuid: &Id, permissions: &[Permission]) -> Result<()> {
        let role_uuid = role_uuid.clone();
        let target_uuid = target_uuid.clone();
        let permissions = permissions.to_vec();
        self.store
            .write(move |graph| {
                let role = Self::role_mut(graph, &role_uuid)?;
                role.grants.entry(target_uuid).or_default().extend(permissions);
                Ok(())
            })
            .await?;
        self.clear_cache().await;
        Ok(())
    }

    /// Revoke permissions on `target_uuid` from a role
    pub async fn revoke(&self, role_uuid: &Id, target_uuid: &Id, permissions: &[Permission]) -> Result<()> {
        let role_uuid = role_uuid.clone();
        let target_uuid = target_uuid.clone();
        let permissions = permissions.to_vec();
        self.store
            .write(move |graph| {
                let role = Self::role_mut(graph, &role_uuid)?;
                if let Some(granted) = role.grants.get_mut(&target_uuid) {
                    granted.retain(|p| !permissions.contains(p));
                    if granted.is_empty() {
                        role.grants.remove(&target_uuid);
                    }
                }
                Ok(())
            })
            .await?;
        self.clear_cache().await;
        Ok(())
    }

    /// Effective permissions of a user on a target, union over all roles of
    /// all groups the user belongs to
    pub async fn permissions(&self, user_uuid: &Id, target_uuid: &Id) -> Result<BTreeSet<Permission>> {
        if let Some(cached) = self.cache.get(user_uuid, target_uuid).await {
            return Ok(cached);
        }

        // Captured before reading so a concurrent invalidation wins over this insert
        let generation = self.cache.generation();
        let user = user_uuid.clone();
        let target = target_uuid.clone();
        let permissions = self
            .store
            .read(move |graph| Self::effective_permissions(graph, &user, &target))
            .await?;

        self.cache
            .put(user_uuid, target_uuid, permissions.clone(), generation)
            .await;
        Ok(permissions)
    }

    pub async fn has_permission(&self, user_uuid: &Id, target_uuid: &Id, permission: Permission) -> Result<bool> {
        Ok(self.permissions(user_uuid, target_uuid).await?.contains(&permission))
    }

    fn effective_permissions(graph: &Graph, user_uuid: &str, target_uuid: &str) -> Result<BTreeSet<Permission>> {
        if !graph.users.contains_key(user_uuid) {
            return Err(ContentError::not_found("User", user_uuid));
        }
        Ok(graph
            .groups
            .values()
            .filter(|group| group.users.contains(user_uuid))
            .flat_map(|group| group.roles.iter())
            .filter_map(|role_uuid| graph.roles.get(role_uuid))
            .filter_map(|role| role.permissions_on(target_uuid))
            .flatten()
            .copied()
            .collect())
    }

    async fn change_group_users(&self, user_uuid: &Id, group_uuid: &Id, change: Membership) -> Result<()> {
        let user_uuid = user_uuid.clone();
        let group_uuid = group_uuid.clone();
        self.store
            .write(move |graph| {
                if !graph.users.contains_key(&user_uuid) {
                    return Err(ContentError::not_found("User", user_uuid));
                }
                let group = Self::group_mut(graph, &group_uuid)?;
                match change {
                    Membership::Add => group.users.insert(user_uuid),
                    Membership::Remove => group.users.remove(&user_uuid),
                };
                Ok(())
            })
            .await?;
        self.clear_cache().await;
        Ok(())
    }

    async fn change_group_roles(&self, role_uuid: &Id, group_uuid: &Id, change: Membership) -> Result<()> {
        let role_uuid = role_uuid.clone();
        let group_uuid = group_uuid.clone();
        self.store
            .write(move |graph| {
                if !graph.roles.contains_key(&role_uuid) {
                    return Err(ContentError::not_found("Role", role_uuid));
                }
                let group = Self::group_mut(graph, &group_uuid)?;
                match change {
                    Membership::Add => group.roles.insert(role_uuid),
                    Membership::Remove => group.roles.remove(&role_uuid),
                };
                Ok(())
            })
            .await?;
        self.clear_cache().await;
        Ok(())
    }

    async fn clear_cache(&self) {
        self.cache.invalidate_all().await;
        self.events.publish(
            EventTopic::ClearPermissionStore,
            EventPayload::PermissionStoreCleared {
                origin: self.origin.clone(),
            },
        );
    }

    fn group_mut<'a>(graph: &'a mut Graph, uuid: &str) -> Result<&'a mut Group> {
        graph
            .groups
            .get_mut(uuid)
            .ok_or_else(|| ContentError::not_found("Group", uuid))
    }

    fn role_mut<'a>(graph: &'a mut Graph, uuid: &str) -> Result<&'a mut Role> {
        graph
            .roles
            .get_mut(uuid)
            .ok_or_else(|| ContentError::not_found("Role", uuid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::time::Duration;

    async fn setup() -> (PermissionService<MemoryStore>, User, Group, Role) {
        let service = PermissionService::new(
            Arc::new(MemoryStore::new()),
            PermissionCache::new(Duration::from_secs(60)),
            EventBus::new(),
            "node-a".into(),
        );
        let user = service.create_user("editor").await.unwrap();
        let group = service.create_group("editors").await.unwrap();
        let role = service.create_role("content-editor").await.unwrap();
        service.add_user_to_group(&user.uuid, &group.uuid).await.unwrap();
        service.add_role_to_group(&role.uuid, &group.uuid).await.unwrap();
        (service, user, group, role)
    }

    #[tokio::test]
    async fn test_permissions_follow_groups_and_roles() {
        let (service, user, group, role) = setup().await;
        let target: Id = "project-1".into();

        service
            .grant(&role.uuid, &target, &[Permission::Read, Permission::Update])
            .await
            .unwrap();
        assert!(service.has_permission(&user.uuid, &target, Permission::Update).await.unwrap());
        assert!(!service.has_permission(&user.uuid, &target, Permission::Delete).await.unwrap());

        service.remove_user_from_group(&user.uuid, &group.uuid).await.unwrap();
        assert!(service.permissions(&user.uuid, &target).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_revoke_clears_cache_and_announces() {
        let (service, user, _, role) = setup().await;
        let target: Id = "project-1".into();
        service.grant(&role.uuid, &target, &[Permission::Read]).await.unwrap();

        assert!(service.has_permission(&user.uuid, &target, Permission::Read).await.unwrap());
        assert_eq!(service.cache().len().await, 1);

        let mut cleared = service.events.subscribe(EventTopic::ClearPermissionStore);
        service.revoke(&role.uuid, &target, &[Permission::Read]).await.unwrap();
        assert_eq!(service.cache().len().await, 0);
        assert_eq!(
            cleared.recv().await.unwrap(),
            EventPayload::PermissionStoreCleared {
                origin: "node-a".into()
            }
        );
        assert!(!service.has_permission(&user.uuid, &target, Permission::Read).await.unwrap());
    }

    #[tokio::test]
    async fn test_unknown_user_is_not_found() {
        let (service, _, _, _) = setup().await;
        let err = service
            .permissions(&"missing".to_string(), &"project-1".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, ContentError::NotFound { .. }));

        let err = service.create_user("editor").await.unwrap_err();
        assert!(matches!(err, ContentError::Conflict(_)));
    }
}

use async_trait::async_trait;
use kube::Client;
use kube::api::{
    Api, ApiResource, DeleteParams, DynamicObject, ListParams, PostParams,
};
use tracing::trace;

use super::{ResourceStore, StoreObject, StoreResult, object_name};

/// [`ResourceStore`] over the API server. Every kind goes through
/// `Api<DynamicObject>` so cluster and namespaced scopes share one path.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K: StoreObject>(&self, ns: Option<&str>) -> Api<DynamicObject> {
        let ar = ApiResource::erase::<K>(&());
        match ns {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &ar),
            None => Api::all_with(self.client.clone(), &ar),
        }
    }
}

fn to_dynamic<K: StoreObject>(obj: &K) -> StoreResult<DynamicObject> {
    Ok(serde_json::from_value(serde_json::to_value(obj)?)?)
}

fn from_dynamic<K: StoreObject>(obj: DynamicObject) -> StoreResult<K> {
    Ok(serde_json::from_value(serde_json::to_value(obj)?)?)
}

#[async_trait]
impl ResourceStore for KubeStore {
    async fn get<K: StoreObject>(
        &self,
        ns: Option<&str>,
        name: &str,
    ) -> StoreResult<Option<K>> {
        let found = self.api::<K>(ns).get_opt(name).await?;
        found.map(from_dynamic).transpose()
    }

    async fn list<K: StoreObject>(
        &self,
        ns: Option<&str>,
        selector: &str,
    ) -> StoreResult<Vec<K>> {
        let mut lp = ListParams::default();
        if !selector.is_empty() {
            lp = lp.labels(selector);
        }
        let list = self.api::<K>(ns).list(&lp).await?;
        list.items.into_iter().map(from_dynamic).collect()
    }

    async fn create<K: StoreObject>(&self, obj: &K) -> StoreResult<K> {
        let ns = obj.meta().namespace.clone();
        let created = self
            .api::<K>(ns.as_deref())
            .create(&PostParams::default(), &to_dynamic(obj)?)
            .await?;
        trace!(kind = %K::kind(&()), name = ?created.metadata.name, "created");
        from_dynamic(created)
    }

    async fn replace<K: StoreObject>(&self, obj: &K) -> StoreResult<K> {
        let name = object_name(obj)?;
        let ns = obj.meta().namespace.clone();
        let replaced = self
            .api::<K>(ns.as_deref())
            .replace(&name, &PostParams::default(), &to_dynamic(obj)?)
            .await?;
        from_dynamic(replaced)
    }

    async fn replace_status<K: StoreObject>(&self, obj: &K) -> StoreResult<K> {
        let name = object_name(obj)?;
        let ns = obj.meta().namespace.clone();
        let body = serde_json::to_vec(&to_dynamic(obj)?)?;
        let replaced = self
            .api::<K>(ns.as_deref())
            .replace_status(&name, &PostParams::default(), body)
            .await?;
        from_dynamic(replaced)
    }

    async fn delete<K: StoreObject>(
        &self,
        ns: Option<&str>,
        name: &str,
    ) -> StoreResult<bool> {
        match self
            .api::<K>(ns)
            .delete(name, &DeleteParams::background())
            .await
        {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

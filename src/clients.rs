//! Registry of window clients the worker can control, focus and open.

use serde::Serialize;
use std::collections::BTreeMap;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Client {
  pub id: String,
  pub url: Url,
  pub focused: bool,
  /// Version tag of the worker controlling this client, if any
  pub controller: Option<String>,
}

#[derive(Debug, Default)]
pub struct Clients {
  clients: BTreeMap<String, Client>,
  next_id: u64,
}

impl Clients {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register an already open, uncontrolled window.
  pub fn connect(&mut self, url: Url) -> Client {
    self.insert(url, false)
  }

  /// Open a new window and give it focus.
  pub fn open_window(&mut self, url: Url) -> Client {
    self.insert(url, true)
  }

  fn insert(&mut self, url: Url, focused: bool) -> Client {
    self.next_id += 1;
    let id = format!("client-{}", self.next_id);
    if focused {
      self.blur_all();
    }
    let client = Client {
      id: id.clone(),
      url,
      focused,
      controller: None,
    };
    self.clients.insert(id, client.clone());
    client
  }

  fn blur_all(&mut self) {
    for client in self.clients.values_mut() {
      client.focused = false;
    }
  }

  pub fn get(&self, id: &str) -> Option<&Client> {
    self.clients.get(id)
  }

  pub fn all(&self) -> Vec<&Client> {
    self.clients.values().collect()
  }

  /// First window whose URL contains the given fragment.
  pub fn find_by_url(&self, fragment: &str) -> Option<&Client> {
    self
      .clients
      .values()
      .find(|c| c.url.as_str().contains(fragment))
  }

  /// Focus a window. Returns false for unknown ids.
  pub fn focus(&mut self, id: &str) -> bool {
    if !self.clients.contains_key(id) {
      return false;
    }
    self.blur_all();
    if let Some(client) = self.clients.get_mut(id) {
      client.focused = true;
    }
    true
  }

  pub fn navigate(&mut self, id: &str, url: Url) -> bool {
    match self.clients.get_mut(id) {
      Some(client) => {
        client.url = url;
        true
      }
      None => false,
    }
  }

  pub fn remove(&mut self, id: &str) -> Option<Client> {
    self.clients.remove(id)
  }

  /// Put every client under the given worker version. Returns how many changed controller.
  pub fn claim(&mut self, version: &str) -> usize {
    let mut claimed = 0;
    for client in self.clients.values_mut() {
      if client.controller.as_deref() != Some(version) {
        client.controller = Some(version.to_string());
        claimed += 1;
      }
    }
    claimed
  }
}
